//! Build result types.
//!
//! Contains types for representing the outcome of a pipeline invocation.

use std::path::PathBuf;
use std::time::Duration;

/// Status of a single output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Output was (re)generated
    Success,
    /// Output was already up to date
    Skipped,
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Success => write!(f, "success"),
            BuildStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of building a single output file.
#[derive(Debug, Clone)]
pub struct TargetResult {
    /// Full path of the output
    pub output: PathBuf,
    /// Name of the filter that produced it
    pub filter: String,
    /// Build status
    pub status: BuildStatus,
    /// Build duration
    pub duration: Duration,
}

impl TargetResult {
    /// Create a successful result.
    pub fn success(output: PathBuf, filter: String, duration: Duration) -> Self {
        Self { output, filter, status: BuildStatus::Success, duration }
    }

    /// Create a skipped result.
    pub fn skipped(output: PathBuf, filter: String) -> Self {
        Self { output, filter, status: BuildStatus::Skipped, duration: Duration::ZERO }
    }

    /// Target identifier used in progress output.
    pub fn target_id(&self) -> String {
        format!("{}:{}", self.filter, self.output.display())
    }
}

/// Result of a complete pipeline invocation.
#[derive(Debug, Default)]
pub struct BuildResult {
    /// Results for each output, in build order
    pub targets: Vec<TargetResult>,
    /// Total build duration
    pub total_duration: Duration,
}

impl BuildResult {
    /// Create a new empty build result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target result.
    pub fn add_result(&mut self, result: TargetResult) {
        self.targets.push(result);
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.total_duration = duration;
        self
    }

    /// Merge another result into this one.
    pub fn extend(&mut self, other: BuildResult) {
        self.targets.extend(other.targets);
        self.total_duration += other.total_duration;
    }

    /// Get the number of regenerated outputs.
    pub fn success_count(&self) -> usize {
        self.targets.iter().filter(|r| r.status == BuildStatus::Success).count()
    }

    /// Get the number of up-to-date outputs.
    pub fn skipped_count(&self) -> usize {
        self.targets.iter().filter(|r| r.status == BuildStatus::Skipped).count()
    }

    /// Get the outputs that were regenerated.
    pub fn built_outputs(&self) -> Vec<&PathBuf> {
        self.targets
            .iter()
            .filter(|r| r.status == BuildStatus::Success)
            .map(|r| &r.output)
            .collect()
    }

    /// Format a summary of the build result.
    pub fn summary(&self) -> String {
        format!(
            "Build succeeded: {} built, {} skipped ({} total) in {:?}",
            self.success_count(),
            self.skipped_count(),
            self.targets.len(),
            self.total_duration
        )
    }
}
