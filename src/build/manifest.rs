//! Build manifest recording what each output was generated from.
//!
//! The manifest lives in the staging directory of a configuration version,
//! so a new version starts with an empty record and rebuilds every output,
//! while a later process building the same version can still tell that an
//! output's input list changed since the last build.
//!
//! # Manifest Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "outputs": {
//!     "/project/public/application.js": [
//!       "/project/app/jquery.js",
//!       "/project/app/sproutcore.js"
//!     ]
//!   }
//! }
//! ```

use crate::build::FileHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Current manifest format version.
const MANIFEST_VERSION: u32 = 1;

/// Manifest filename inside a staging directory.
pub const MANIFEST_FILENAME: &str = ".assetpipe-manifest.json";

/// Error during manifest operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ManifestError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Version mismatch
    #[error("Manifest version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Full input paths each output was last built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Manifest format version
    pub version: u32,
    /// Output full path to its inputs, in build order
    outputs: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl Default for BuildManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildManifest {
    /// Create a new empty manifest.
    pub fn new() -> Self {
        Self { version: MANIFEST_VERSION, outputs: BTreeMap::new() }
    }

    /// Load a manifest from a file.
    ///
    /// Returns `Ok(None)` if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ManifestError> {
        if !path.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(File::open(path)?);
        let manifest: BuildManifest = serde_json::from_reader(reader)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(ManifestError::VersionMismatch {
                expected: MANIFEST_VERSION,
                found: manifest.version,
            });
        }

        Ok(Some(manifest))
    }

    /// Load the manifest kept in a staging directory.
    pub fn load_from_dir(staging_dir: &Path) -> Result<Option<Self>, ManifestError> {
        Self::load(&staging_dir.join(MANIFEST_FILENAME))
    }

    /// Save the manifest to a file.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Save the manifest into a staging directory.
    pub fn save_to_dir(&self, staging_dir: &Path) -> Result<(), ManifestError> {
        self.save(&staging_dir.join(MANIFEST_FILENAME))
    }

    /// Record a successful build of `output` from `inputs`.
    pub fn record_build(&mut self, output: &FileHandle, inputs: &[FileHandle]) {
        self.outputs
            .insert(output.fullpath(), inputs.iter().map(FileHandle::fullpath).collect());
    }

    /// Whether `output` was last built from exactly `inputs`.
    ///
    /// An output with no record is never current.
    pub fn is_current(&self, output: &FileHandle, inputs: &[FileHandle]) -> bool {
        self.outputs.get(&output.fullpath()).is_some_and(|recorded| {
            recorded.len() == inputs.len()
                && recorded.iter().zip(inputs).all(|(path, input)| *path == input.fullpath())
        })
    }

    /// Get the recorded inputs of an output.
    pub fn inputs_of(&self, output: &Path) -> Option<&[PathBuf]> {
        self.outputs.get(output).map(Vec::as_slice)
    }

    /// Forget an output.
    pub fn remove(&mut self, output: &FileHandle) -> Option<Vec<PathBuf>> {
        self.outputs.remove(&output.fullpath())
    }

    /// Number of recorded outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Check if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handles(root: &Path, names: &[&str]) -> Vec<FileHandle> {
        names.iter().map(|name| FileHandle::new(root, *name)).collect()
    }

    #[test]
    fn test_manifest_new() {
        let manifest = BuildManifest::new();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_manifest_unrecorded_output_is_not_current() {
        let manifest = BuildManifest::new();
        let output = FileHandle::new("/public", "app.js");
        assert!(!manifest.is_current(&output, &handles(Path::new("/app"), &["a.js"])));
    }

    #[test]
    fn test_manifest_record_build() {
        let mut manifest = BuildManifest::new();
        let output = FileHandle::new("/public", "app.js");
        let inputs = handles(Path::new("/app"), &["a.js", "b.js"]);

        manifest.record_build(&output, &inputs);

        assert_eq!(manifest.len(), 1);
        assert!(manifest.is_current(&output, &inputs));
        assert_eq!(
            manifest.inputs_of(Path::new("/public/app.js")),
            Some([PathBuf::from("/app/a.js"), PathBuf::from("/app/b.js")].as_slice())
        );
    }

    #[test]
    fn test_manifest_input_list_changes() {
        let mut manifest = BuildManifest::new();
        let output = FileHandle::new("/public", "app.js");
        let root = Path::new("/app");
        manifest.record_build(&output, &handles(root, &["a.js", "b.js"]));

        assert!(!manifest.is_current(&output, &handles(root, &["a.js"])));
        assert!(!manifest.is_current(&output, &handles(root, &["b.js", "a.js"])));
        assert!(!manifest.is_current(&output, &handles(root, &["a.js", "b.js", "c.js"])));
        assert!(!manifest.is_current(&output, &handles(Path::new("/other"), &["a.js", "b.js"])));
    }

    #[test]
    fn test_manifest_remove() {
        let mut manifest = BuildManifest::new();
        let output = FileHandle::new("/public", "app.js");
        manifest.record_build(&output, &[]);

        assert!(manifest.remove(&output).is_some());
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_manifest_save_load() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("pipeline-abc");
        let mut manifest = BuildManifest::new();
        manifest.record_build(
            &FileHandle::new(temp.path().join("public"), "app.js"),
            &handles(&temp.path().join("app"), &["a.js", "b.js"]),
        );

        manifest.save_to_dir(&staging).unwrap();
        let loaded = BuildManifest::load_from_dir(&staging).unwrap().unwrap();

        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_manifest_load_nonexistent() {
        let temp = TempDir::new().unwrap();
        assert!(BuildManifest::load_from_dir(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_manifest_load_version_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MANIFEST_FILENAME);
        fs::write(&path, r#"{"version": 99, "outputs": {}}"#).unwrap();

        let err = BuildManifest::load(&path).unwrap_err();
        assert!(matches!(err, ManifestError::VersionMismatch { expected: 1, found: 99 }));
    }

    #[test]
    fn test_manifest_load_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MANIFEST_FILENAME);
        fs::write(&path, "not json").unwrap();

        assert!(matches!(BuildManifest::load(&path), Err(ManifestError::Json(_))));
    }
}
