//! Turning model output into filenames and tag lists.

use regex::Regex;
use std::sync::LazyLock;

/// Prompt used when only a label is wanted.
pub const LABEL_PROMPT: &str = "Analyze the most prominent subject of this photograph and label it in as few words as possible. If the photograph shows multiple items as the main subject, simply label it as the category of what those items fall under.";

/// Prompt used when a label and tags are wanted, in a fixed two-line format.
pub const LABEL_AND_TAGS_PROMPT: &str = "Analyze the most prominent subject of this photograph and label it in as few words as possible. If the photograph shows multiple items as the main subject, simply label it as the category of what those items fall under. Then give three short tags describing the photograph. Respond in exactly two lines and nothing else:\nLabel: <label>\nTags: <tag1>, <tag2>, <tag3>";

/// Maximum number of words kept from a description.
pub const MAX_LABEL_WORDS: usize = 3;

/// Maximum number of tags kept from a response.
pub const MAX_TAGS: usize = 3;

static NON_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s]").unwrap());

/// Make a description usable as a base filename: drop everything outside
/// `[A-Za-z0-9\s]`, keep the first three words, join them with underscores.
pub fn clean_description(description: &str) -> String {
    let stripped = NON_NAME_CHARS.replace_all(description, "");
    stripped
        .split_whitespace()
        .take(MAX_LABEL_WORDS)
        .collect::<Vec<_>>()
        .join("_")
}

/// A parsed two-line response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAndTags {
    /// Cleaned label, ready to be used as a base filename
    pub label: String,
    /// Up to three trimmed tags
    pub tags: Vec<String>,
}

/// Parse a `Label: ...\nTags: a, b, c` response.
///
/// Exactly one line break is accepted. Each line needs its key and a colon.
pub fn parse_label_and_tags(response: &str) -> Result<LabelAndTags, ParseError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let lines: Vec<&str> = trimmed.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    if lines.len() != 2 {
        return Err(ParseError::LineCount(lines.len()));
    }

    let label_text = field_value(lines[0], "Label")?;
    let tags_text = field_value(lines[1], "Tags")?;

    let label = clean_description(label_text);
    if label.is_empty() {
        return Err(ParseError::EmptyLabel(label_text.to_string()));
    }

    let tags = tags_text
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .take(MAX_TAGS)
        .map(str::to_string)
        .collect();

    Ok(LabelAndTags { label, tags })
}

/// Value after `<key>:` on a line, key matched case-insensitively.
fn field_value<'a>(line: &'a str, key: &'static str) -> Result<&'a str, ParseError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| ParseError::MissingField(key, line.to_string()))?;
    if !name.trim().eq_ignore_ascii_case(key) {
        return Err(ParseError::MissingField(key, line.to_string()));
    }
    Ok(value.trim())
}

/// Errors raised while parsing a two-line label response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty response")]
    EmptyResponse,

    #[error("Expected 2 lines (Label/Tags), got {0}")]
    LineCount(usize),

    #[error("Expected a \"{0}:\" line, got {1:?}")]
    MissingField(&'static str, String),

    #[error("Label has no usable characters: {0:?}")]
    EmptyLabel(String),
}
