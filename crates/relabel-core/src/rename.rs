use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::media::dotted_extension;

/// What to do when the labeled name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Append `_1`, `_2`, ... until the name is free
    Suffix,
    /// Rename onto the existing file, replacing it
    Overwrite,
}

/// First free path of the form `<base><ext>`, `<base>_1<ext>`, `<base>_2<ext>`, ...
/// `ext` includes its leading dot (or is empty).
pub fn unique_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{}{}", base, ext));
    let mut sequence = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}{}", base, sequence, ext));
        sequence += 1;
    }
    candidate
}

/// Target path for renaming `path` to `base`, keeping its extension and directory.
pub fn target_path(path: &Path, base: &str, policy: CollisionPolicy) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let ext = dotted_extension(path);
    match policy {
        CollisionPolicy::Suffix => unique_path(dir, base, &ext),
        CollisionPolicy::Overwrite => dir.join(format!("{}{}", base, ext)),
    }
}

/// Rename `path` to `<base><ext>` in the same directory and return the new path.
pub fn rename_to_label(path: &Path, base: &str, policy: CollisionPolicy) -> io::Result<PathBuf> {
    let dest = target_path(path, base, policy);
    if policy == CollisionPolicy::Overwrite && dest != path && dest.exists() {
        tracing::warn!(dest = %dest.display(), "overwriting existing file");
    }
    fs::rename(path, &dest)?;
    Ok(dest)
}
