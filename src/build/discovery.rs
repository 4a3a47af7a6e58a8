//! Input file discovery.
//!
//! Expands a branch's glob pattern under its input root into the sorted list
//! of relative paths the first filter stage consumes.

use glob::{glob, Pattern};
use std::path::{Path, PathBuf};

/// Error during input discovery.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Invalid glob pattern
    InvalidPattern(String, glob::PatternError),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::InvalidPattern(pattern, err) => {
                write!(f, "Invalid glob pattern '{}': {}", pattern, err)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::InvalidPattern(_, err) => Some(err),
        }
    }
}

/// Discover files matching a glob pattern.
///
/// # Arguments
/// - `base_dir` - Directory the pattern is resolved against
/// - `pattern` - Glob pattern relative to `base_dir`
/// - `exclude` - Directories whose contents are never returned
///
/// # Returns
/// Sorted paths relative to `base_dir`. Only regular files are returned.
pub fn discover_files(
    base_dir: &Path,
    pattern: &str,
    exclude: &[&Path],
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let escaped_base = Pattern::escape(&base_dir.to_string_lossy());
    let full_pattern = Path::new(&escaped_base).join(pattern);
    let pattern_str = full_pattern.to_string_lossy();

    let paths =
        glob(&pattern_str).map_err(|e| DiscoveryError::InvalidPattern(pattern.to_string(), e))?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => {
                if !path.is_file() || exclude.iter().any(|dir| path.starts_with(dir)) {
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(base_dir) {
                    files.push(relative.to_path_buf());
                }
            }
            Err(e) => {
                // Unreadable entries are skipped, not fatal
                tracing::warn!("Error reading path during discovery: {}", e);
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(&path).unwrap().write_all(b"x").unwrap();
        path
    }

    #[test]
    fn test_discover_files_simple() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "app.js");
        create_test_file(temp.path(), "other.txt");

        let files = discover_files(temp.path(), "*.js", &[]).unwrap();
        assert_eq!(files, vec![PathBuf::from("app.js")]);
    }

    #[test]
    fn test_discover_files_recursive_sorted_relative() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "sub/deep/c.js");
        create_test_file(temp.path(), "b.js");
        create_test_file(temp.path(), "sub/a.js");

        let files = discover_files(temp.path(), "**/*.js", &[]).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("b.js"), PathBuf::from("sub/a.js"), PathBuf::from("sub/deep/c.js")]
        );
    }

    #[test]
    fn test_discover_files_skips_directories() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("dir.js")).unwrap();
        create_test_file(temp.path(), "real.js");

        let files = discover_files(temp.path(), "*", &[]).unwrap();
        assert_eq!(files, vec![PathBuf::from("real.js")]);
    }

    #[test]
    fn test_discover_files_excludes_directories() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "app/a.js");
        create_test_file(temp.path(), "tmp/pipeline-x/0-0/a.js");
        create_test_file(temp.path(), "public/a.js");

        let tmp = temp.path().join("tmp");
        let public = temp.path().join("public");
        let files = discover_files(temp.path(), "**/*.js", &[tmp.as_path(), public.as_path()]).unwrap();
        assert_eq!(files, vec![PathBuf::from("app/a.js")]);
    }

    #[test]
    fn test_discover_files_no_match() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "image.png");

        let files = discover_files(temp.path(), "*.js", &[]).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_discover_files_invalid_pattern() {
        let temp = TempDir::new().unwrap();
        let result = discover_files(temp.path(), "***/[", &[]);
        assert!(matches!(result, Err(DiscoveryError::InvalidPattern(_, _))));
    }
}
