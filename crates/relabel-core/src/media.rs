use std::path::{Path, PathBuf};

use image::ImageFormat;

/// Extensions picked up by the directory scan (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

#[derive(Debug, Clone)]
pub struct ImageFile {
    /// Full path on disk
    pub path: PathBuf,
    /// Just the filename
    pub filename: String,
    /// Format inferred from the extension, None if unknown
    pub format: Option<ImageFormat>,
}

impl ImageFile {
    pub fn new(path: PathBuf) -> Self {
        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = ImageFormat::from_path(&path).ok();
        Self {
            path,
            filename,
            format,
        }
    }
}

/// Check whether a path ends in one of the supported image extensions.
pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Extension of a path including the leading dot, or an empty string.
/// Case is preserved.
pub fn dotted_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{}", ext),
        None => String::new(),
    }
}
