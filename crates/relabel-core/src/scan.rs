use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::media::{has_supported_extension, ImageFile};

/// List the supported images directly inside `dir` (non-recursive).
/// Sorted by filename so runs are reproducible.
pub fn scan_dir(dir: &Path) -> anyhow::Result<Vec<ImageFile>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Cannot read directory {}", dir.display()))?;

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if has_supported_extension(&path) {
            images.push(ImageFile::new(path));
        }
    }

    images.sort_by(|a, b| a.filename.cmp(&b.filename));
    tracing::debug!(count = images.len(), dir = %dir.display(), "scanned source directory");
    Ok(images)
}

/// Every regular file inside `dir`, sorted by path.
///
/// The labeling pass works on whatever sits in the resized directory,
/// including leftovers from earlier runs.
pub fn list_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Cannot read directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
