pub mod cancel;
pub mod label;
pub mod media;
pub mod metadata;
pub mod rename;
pub mod resize;
pub mod scan;
pub mod vision;

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use cancel::{CancellationToken, CancelledError};
pub use label::{clean_description, parse_label_and_tags, LabelAndTags, ParseError};
pub use metadata::{Embedded, MetadataError};
pub use rename::CollisionPolicy;
pub use resize::{DEFAULT_SCALE, RESIZED_DIR};
pub use vision::{Labeler, VisionClient, VisionConfig, VisionError};

/// Which flavour of labeling to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Ask for a short label and rename the file after it
    #[default]
    Rename,
    /// Ask for a label plus tags, embed both as metadata, then rename
    Tag,
}

impl Mode {
    pub fn prompt(self) -> &'static str {
        match self {
            Mode::Rename => label::LABEL_PROMPT,
            Mode::Tag => label::LABEL_AND_TAGS_PROMPT,
        }
    }

    pub fn max_tokens(self) -> u32 {
        match self {
            Mode::Rename => 15,
            Mode::Tag => 50,
        }
    }

    /// Rename mode never clobbers; tag mode renames straight onto the target.
    pub fn default_collision_policy(self) -> CollisionPolicy {
        match self {
            Mode::Rename => CollisionPolicy::Suffix,
            Mode::Tag => CollisionPolicy::Overwrite,
        }
    }
}

fn default_scale() -> f64 {
    DEFAULT_SCALE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Directory holding the source images
    pub dir: PathBuf,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Overrides the mode's collision policy
    #[serde(default)]
    pub on_collision: Option<CollisionPolicy>,
    #[serde(default)]
    pub vision: VisionConfig,
}

impl ProcessOptions {
    pub fn new(dir: impl Into<PathBuf>, mode: Mode) -> Self {
        Self {
            dir: dir.into(),
            mode,
            scale: DEFAULT_SCALE,
            on_collision: None,
            vision: VisionConfig::default(),
        }
    }

    pub fn collision_policy(&self) -> CollisionPolicy {
        self.on_collision
            .unwrap_or_else(|| self.mode.default_collision_policy())
    }

    pub fn resized_dir(&self) -> PathBuf {
        self.dir.join(RESIZED_DIR)
    }

    fn prompt(&self) -> &str {
        self.vision.prompt.as_deref().unwrap_or(self.mode.prompt())
    }

    fn max_tokens(&self) -> u32 {
        self.vision.max_tokens.unwrap_or(self.mode.max_tokens())
    }
}

/// Final state of one file in the resized directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Renamed(PathBuf),
    /// Left under its resized name
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct FileOutcome {
    /// Path in the resized directory before renaming
    pub path: PathBuf,
    pub status: FileStatus,
    /// Cleaned label, when one was obtained
    pub label: Option<String>,
    pub tags: Vec<String>,
    /// Whether description and tags were written into the file
    pub metadata_embedded: bool,
    /// Text metadata read back from the renamed file
    pub metadata: Vec<(String, String)>,
}

impl FileOutcome {
    fn skipped(path: &Path, reason: String) -> Self {
        Self {
            path: path.to_path_buf(),
            status: FileStatus::Skipped(reason),
            label: None,
            tags: Vec::new(),
            metadata_embedded: false,
            metadata: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub images_found: u64,
    pub resized: u64,
    pub renamed: u64,
    pub skipped: u64,
    pub outcomes: Vec<FileOutcome>,
    pub warnings: Vec<String>,
}

/// Control options for process execution.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn check(&self) -> Result<(), CancelledError> {
        match &self.cancel_token {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }
}

/// Progress callback: (stage, current, total, message)
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Run the resize, label and rename pipeline.
pub fn process(
    options: &ProcessOptions,
    labeler: &dyn Labeler,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<ProcessResult> {
    process_with_control(options, labeler, &ProcessControl::default(), progress_callback)
}

/// Run the pipeline with cancellation support.
///
/// Decode and transport errors abort the run. A
/// response without choices, or one that cannot be parsed, skips that file.
pub fn process_with_control(
    options: &ProcessOptions,
    labeler: &dyn Labeler,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<ProcessResult> {
    control.check()?;

    // Stage 1: scan
    let images = scan::scan_dir(&options.dir)?;
    let mut result = ProcessResult {
        images_found: images.len() as u64,
        ..Default::default()
    };

    // Stage 2: resize everything up front
    let resized_dir = options.resized_dir();
    let outputs = resize::resize_all(&images, &resized_dir, options.scale, progress_callback)?;
    result.resized = outputs.len() as u64;

    // Stage 3: label and rename whatever is in the resized directory
    let files = scan::list_files(&resized_dir)?;
    let total = files.len() as u64;
    for (i, path) in files.iter().enumerate() {
        control.check()?;
        let report = |message: &str| progress_callback("label", i as u64, total, message);

        let outcome = label_file(path, options, labeler, &report)?;
        match &outcome.status {
            FileStatus::Renamed(_) => result.renamed += 1,
            FileStatus::Skipped(reason) => {
                result.skipped += 1;
                result.warnings.push(reason.clone());
            }
        }
        result.outcomes.push(outcome);
    }

    Ok(result)
}

fn label_file(
    path: &Path,
    options: &ProcessOptions,
    labeler: &dyn Labeler,
    report: &dyn Fn(&str),
) -> anyhow::Result<FileOutcome> {
    let description = labeler
        .describe(path, options.prompt(), options.max_tokens())
        .with_context(|| format!("Labeling {} failed", path.display()))?;

    let Some(description) = description else {
        let reason = format!("Failed to get a description for {}", path.display());
        report(&reason);
        return Ok(FileOutcome::skipped(path, reason));
    };
    tracing::debug!(path = %path.display(), %description, "got description");

    let (label, tags) = match options.mode {
        Mode::Rename => (clean_description(&description), Vec::new()),
        Mode::Tag => match parse_label_and_tags(&description) {
            Ok(parsed) => (parsed.label, parsed.tags),
            Err(e) => {
                let reason = format!(
                    "Could not parse label and tags for {}: {}",
                    path.display(),
                    e
                );
                report(&reason);
                return Ok(FileOutcome::skipped(path, reason));
            }
        },
    };

    if label.is_empty() {
        let reason = format!(
            "Description for {} has no usable characters: {:?}",
            path.display(),
            description
        );
        report(&reason);
        return Ok(FileOutcome::skipped(path, reason));
    }

    let mut metadata_embedded = false;
    if options.mode == Mode::Tag {
        let embedded = metadata::embed(path, &label, &tags)
            .with_context(|| format!("Embedding metadata into {} failed", path.display()))?;
        match embedded {
            Embedded::Png | Embedded::Jpeg => metadata_embedded = true,
            Embedded::Unsupported(format) => report(&format!(
                "Metadata embedding skipped for {}: unsupported format {:?}",
                path.display(),
                format
            )),
        }
    }

    let new_path = rename::rename_to_label(path, &label, options.collision_policy())
        .with_context(|| format!("Cannot rename {}", path.display()))?;
    report(&format!("Renamed {} to {}", path.display(), new_path.display()));

    let mut read_back = Vec::new();
    if options.mode == Mode::Tag {
        read_back = metadata::read_back(&new_path)
            .with_context(|| format!("Reading metadata from {} failed", new_path.display()))?;
        for (key, value) in &read_back {
            report(&format!("  {}: {}", key, value));
        }
    }

    Ok(FileOutcome {
        path: path.to_path_buf(),
        status: FileStatus::Renamed(new_path),
        label: Some(label),
        tags,
        metadata_embedded,
        metadata: read_back,
    })
}
