//! Image file storage under the media root.
//!
//! Imported images live at `{root}/{machine_name}/{version}/images/{basename}`
//! so that deleting a version is a single directory removal.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Directory holding every file for one version of a project.
pub fn version_dir(root: &Path, machine_name: &str, version: &str) -> PathBuf {
    root.join(machine_name).join(version)
}

/// Storage path for an image, keyed by the basename of its bundle path.
pub fn image_path(root: &Path, machine_name: &str, version: &str, orig_path: &str) -> PathBuf {
    let basename = Path::new(orig_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| orig_path.to_string());
    version_dir(root, machine_name, version)
        .join("images")
        .join(basename)
}

/// Write image bytes to the media root, returning the stored path and a
/// hex SHA-256 of the contents.
pub fn store_image(
    root: &Path,
    machine_name: &str,
    version: &str,
    orig_path: &str,
    bytes: &[u8],
) -> Result<(PathBuf, String)> {
    let path = image_path(root, machine_name, version, orig_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create media directory {}", parent.display()))?;
    }
    std::fs::write(&path, bytes)
        .with_context(|| format!("Failed to write image {}", path.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = format!("{:x}", hasher.finalize());

    Ok((path, hash))
}

/// Remove every stored file for a version. Missing directories are fine.
pub fn purge_version(root: &Path, machine_name: &str, version: &str) -> Result<()> {
    let dir = version_dir(root, machine_name, version);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to remove media directory {}", dir.display()))?;
    }
    Ok(())
}

/// Guess a Content-Type from an image file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_path_uses_basename() {
        let path = image_path(Path::new("/media"), "proj", "1.0", "_images/diagram.png");
        assert_eq!(
            path,
            PathBuf::from("/media/proj/1.0/images/diagram.png")
        );
    }

    #[test]
    fn store_and_purge_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (path, hash) =
            store_image(tmp.path(), "proj", "1.0", "_images/a.png", b"bytes").unwrap();
        assert!(path.exists());
        assert_eq!(hash.len(), 64);

        purge_version(tmp.path(), "proj", "1.0").unwrap();
        assert!(!path.exists());
        // Purging again is a no-op
        purge_version(tmp.path(), "proj", "1.0").unwrap();
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("a/b.PNG"), "image/png");
        assert_eq!(content_type_for("x.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
