//! Configuration schema types for `Assetfile.toml`
//!
//! Defines the structure and validation rules for pipeline configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the executor decides an output is out of date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StalenessMode {
    /// Rebuild when the output is missing or older than an input
    #[default]
    Mtime,
    /// Rebuild every output on every invocation
    Always,
}

/// Build execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Worker threads per stage
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Freshness rule
    #[serde(default)]
    pub staleness: StalenessMode,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { jobs: default_jobs(), staleness: StalenessMode::default() }
    }
}

fn default_jobs() -> usize {
    1
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Clear terminal between rebuilds
    #[serde(default)]
    pub clear_screen: bool,
}

fn default_debounce_ms() -> u32 {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms(), clear_screen: false }
    }
}

/// One filter in a branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Registered filter name
    pub kind: String,
    /// Single output every input is written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Replace each input's extension with this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

/// One `[[pipeline]]` branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Glob selecting inputs
    #[serde(default = "default_glob")]
    pub glob: String,
    /// Input root override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,
    /// Filter chain
    #[serde(default, rename = "filter")]
    pub filters: Vec<FilterConfig>,
}

fn default_glob() -> String {
    crate::build::DEFAULT_GLOB.to_string()
}

/// Complete Assetfile.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetfileConfig {
    /// Root for staging directories
    #[serde(default = "default_tmpdir")]
    pub tmpdir: PathBuf,
    /// Directory final artifacts are written to (required)
    pub output: PathBuf,
    /// Default input root
    #[serde(default = "default_input")]
    pub input: PathBuf,
    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,
    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,
    /// Branches, built in order
    #[serde(default, rename = "pipeline")]
    pub pipelines: Vec<BranchConfig>,
}

fn default_tmpdir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_input() -> PathBuf {
    PathBuf::from(".")
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "pipeline[0].glob")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Assetfile.toml: '{}' {}", self.field, self.message)
    }
}

impl AssetfileConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.output.as_os_str().is_empty() {
            errors.push(ConfigValidationError {
                field: "output".to_string(),
                message: "must be a non-empty path".to_string(),
            });
        }

        if self.build.jobs == 0 {
            errors.push(ConfigValidationError {
                field: "build.jobs".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        if self.pipelines.is_empty() {
            errors.push(ConfigValidationError {
                field: "pipeline".to_string(),
                message: "must define at least one [[pipeline]] branch".to_string(),
            });
        }

        for (i, branch) in self.pipelines.iter().enumerate() {
            if branch.glob.is_empty() {
                errors.push(ConfigValidationError {
                    field: format!("pipeline[{}].glob", i),
                    message: "must be a non-empty glob pattern".to_string(),
                });
            }

            for (j, filter) in branch.filters.iter().enumerate() {
                if filter.kind.is_empty() {
                    errors.push(ConfigValidationError {
                        field: format!("pipeline[{}].filter[{}].kind", i, j),
                        message: "must name a filter".to_string(),
                    });
                }

                if filter.output.is_some() && filter.extension.is_some() {
                    errors.push(ConfigValidationError {
                        field: format!("pipeline[{}].filter[{}]", i, j),
                        message: "cannot set both output and extension".to_string(),
                    });
                }
            }
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}
