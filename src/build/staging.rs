//! Staging directories for intermediate build artifacts.
//!
//! Each distinct configuration gets its own staging directory under the
//! pipeline's temp root, named `pipeline-<digest>` after a SHA-256 digest of
//! the configuration source. Intermediate filter outputs live in per-stage
//! subdirectories of it, so artifacts from a previous configuration never
//! leak into a new build and can be removed wholesale.
//!
//! ```text
//! tmp/
//!   pipeline-3f9a.../      current configuration
//!     0-0/                 branch 0, filter 0
//!     0-1/
//!   pipeline-77c1.../      stale, removed by cleanup_stale
//!   cache/                 not ours, never touched
//! ```

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Prefix shared by every staging directory name.
pub const STAGING_PREFIX: &str = "pipeline-";

/// Compute the digest of a configuration source.
///
/// Returns a 64 character lowercase hex SHA-256 string. Used only to name
/// and compare configuration versions.
pub fn digest(source: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(source.as_ref()))
}

/// Build the staging directory name for a digest.
pub fn namespace_for(digest: &str) -> String {
    format!("{}{}", STAGING_PREFIX, digest)
}

/// Whether a directory name follows the staging naming convention.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Directory a filter stage writes its intermediate output to.
///
/// # Arguments
/// - `staging_root` - The current staging directory
/// - `branch` - Index of the branch within the pipeline
/// - `stage` - Index of the filter within the branch
pub fn stage_dir(staging_root: &Path, branch: usize, stage: usize) -> PathBuf {
    staging_root.join(format!("{}-{}", branch, stage))
}

/// Remove every staging directory under `tmp_root` except `current`.
///
/// Only directories whose names start with [`STAGING_PREFIX`] are considered;
/// files and other directories are left alone. A missing `tmp_root` is not an
/// error. Returns the directories that were removed.
pub fn cleanup_stale(tmp_root: &Path, current: &str) -> io::Result<Vec<PathBuf>> {
    if !tmp_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    for entry in fs::read_dir(tmp_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !is_staging_name(&name) || name == current {
            continue;
        }

        let path = entry.path();
        tracing::debug!("Removing stale staging directory {}", path.display());
        fs::remove_dir_all(&path)?;
        removed.push(path);
    }

    removed.sort();
    Ok(removed)
}

/// Remove a file or directory tree if it exists.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(digest("input 'x'"), digest("input 'x'"));
        assert_eq!(digest("input 'x'").len(), 64);
    }

    #[test]
    fn test_digest_differs_for_different_sources() {
        assert_ne!(digest("input 'x'"), digest("input 'y'"));
        assert_ne!(digest(""), digest(" "));
    }

    #[test]
    fn test_digest_known_value() {
        assert_eq!(
            digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_namespace_for() {
        assert_eq!(namespace_for("abc"), "pipeline-abc");
        assert!(is_staging_name(&namespace_for("abc")));
        assert!(!is_staging_name("cache"));
    }

    #[test]
    fn test_stage_dir() {
        let dir = stage_dir(Path::new("/tmp/pipeline-abc"), 1, 2);
        assert_eq!(dir, PathBuf::from("/tmp/pipeline-abc/1-2"));
    }

    #[test]
    fn test_cleanup_stale_keeps_current_and_removes_siblings() {
        let temp = TempDir::new().unwrap();
        let current = namespace_for(&digest("new"));
        let stale_a = namespace_for(&digest("old-a"));
        let stale_b = namespace_for(&digest("old-b"));
        for name in [&current, &stale_a, &stale_b] {
            fs::create_dir_all(temp.path().join(name).join("0-0")).unwrap();
        }

        let removed = cleanup_stale(temp.path(), &current).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(temp.path().join(&current).join("0-0").is_dir());
        assert!(!temp.path().join(&stale_a).exists());
        assert!(!temp.path().join(&stale_b).exists());
    }

    #[test]
    fn test_cleanup_stale_ignores_unrelated_entries() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("cache")).unwrap();
        fs::create_dir_all(temp.path().join("old-pipeline-abc")).unwrap();
        fs::write(temp.path().join("pipeline-file"), "not a dir").unwrap();

        let removed = cleanup_stale(temp.path(), "pipeline-current").unwrap();

        assert!(removed.is_empty());
        assert!(temp.path().join("cache").is_dir());
        assert!(temp.path().join("old-pipeline-abc").is_dir());
        assert!(temp.path().join("pipeline-file").is_file());
    }

    #[test]
    fn test_cleanup_stale_is_idempotent() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("pipeline-old")).unwrap();
        fs::create_dir_all(temp.path().join("pipeline-current")).unwrap();

        assert_eq!(cleanup_stale(temp.path(), "pipeline-current").unwrap().len(), 1);
        assert!(cleanup_stale(temp.path(), "pipeline-current").unwrap().is_empty());
        assert!(temp.path().join("pipeline-current").is_dir());
    }

    #[test]
    fn test_cleanup_stale_missing_root() {
        let temp = TempDir::new().unwrap();
        let removed = cleanup_stale(&temp.path().join("nope"), "pipeline-x").unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn test_remove_path_handles_files_dirs_and_missing() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.txt");
        let dir = temp.path().join("d/e");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(&dir).unwrap();

        remove_path(&file).unwrap();
        remove_path(&temp.path().join("d")).unwrap();
        remove_path(&temp.path().join("missing")).unwrap();

        assert!(!file.exists());
        assert!(!dir.exists());
    }
}
