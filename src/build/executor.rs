//! Build execution.
//!
//! An [`Executor`] turns a set-up [`Pipeline`] into files on disk. Stages
//! run in pipeline order; the outputs of one stage may be generated
//! concurrently since they never depend on each other.
//!
//! # How It Works
//!
//! 1. Compute every stage's output map up front
//! 2. Load the [`BuildManifest`] from the pipeline's staging directory
//! 3. For each stage, skip outputs the manifest records with the same inputs
//!    and the [`Staleness`] rule reports as fresh
//! 4. Generate the remaining outputs on up to `jobs` worker threads
//! 5. Stop at the first failure, save the manifest, and report
//!
//! # Example
//!
//! ```ignore
//! use assetpipe::build::{TaskGraphExecutor, AlwaysStale};
//!
//! let executor = TaskGraphExecutor::new()
//!     .with_jobs(4)
//!     .with_staleness(AlwaysStale);
//!
//! let result = executor.execute(&pipeline)?;
//! ```

use crate::build::{
    BuildManifest, BuildResult, FileHandle, FilterError, FilterStage, ManifestError, NullProgress,
    Pipeline, ProgressEvent, ProgressReporter, TargetResult,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

/// Error that aborts an invocation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// Generating a specific output failed
    #[error("Failed to build {}: {source}", output.display())]
    Build {
        /// Full path of the output
        output: PathBuf,
        /// Filter failure
        #[source]
        source: FilterError,
    },
    /// A stage could not compute its outputs
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// The build manifest could not be saved
    #[error("Failed to save build manifest in {}: {source}", staging_dir.display())]
    Manifest {
        /// Staging directory holding the manifest
        staging_dir: PathBuf,
        /// Manifest failure
        #[source]
        source: ManifestError,
    },
}

/// Schedules and runs the work a pipeline describes.
pub trait Executor: Send + Sync {
    /// Build every output of a set-up pipeline.
    fn execute(&self, pipeline: &Pipeline) -> Result<BuildResult, ExecutionError>;
}

/// Decides whether an output must be regenerated.
pub trait Staleness: Send + Sync {
    /// Whether `output` is out of date with respect to `inputs`.
    fn is_stale(&self, output: &FileHandle, inputs: &[FileHandle]) -> bool;
}

/// Stale when the output is missing or older than any input.
#[derive(Debug, Clone, Copy, Default)]
pub struct MtimeStaleness;

impl Staleness for MtimeStaleness {
    fn is_stale(&self, output: &FileHandle, inputs: &[FileHandle]) -> bool {
        let Some(output_time) = modified(&output.fullpath()) else {
            return true;
        };
        inputs
            .iter()
            .any(|input| modified(&input.fullpath()).map_or(true, |time| time > output_time))
    }
}

/// Every output is always regenerated.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysStale;

impl Staleness for AlwaysStale {
    fn is_stale(&self, _output: &FileHandle, _inputs: &[FileHandle]) -> bool {
        true
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Default number of parallel jobs (uses available parallelism).
pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Executor that runs stages in order and their outputs in parallel.
///
/// The input list each output was last built from is kept in a
/// [`BuildManifest`] inside the staging directory. An output with no record,
/// or whose inputs were added or removed since, is rebuilt even when every
/// timestamp looks fresh. Since the staging directory is named after the
/// configuration digest, a new configuration rebuilds every output.
pub struct TaskGraphExecutor {
    /// Number of worker threads per stage
    jobs: usize,
    /// Freshness rule
    staleness: Box<dyn Staleness>,
    /// Progress sink
    reporter: Arc<dyn ProgressReporter>,
}

impl Default for TaskGraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraphExecutor").field("jobs", &self.jobs).finish_non_exhaustive()
    }
}

impl TaskGraphExecutor {
    /// Create a sequential executor using mtime staleness.
    pub fn new() -> Self {
        Self {
            jobs: 1,
            staleness: Box::new(MtimeStaleness),
            reporter: Arc::new(NullProgress),
        }
    }

    /// Set the number of parallel jobs.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Set the freshness rule.
    pub fn with_staleness(mut self, staleness: impl Staleness + 'static) -> Self {
        self.staleness = Box::new(staleness);
        self
    }

    /// Set the progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Get the number of parallel jobs.
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Run one stage's outputs, in parallel when allowed.
    fn execute_stage(
        &self,
        stage: &FilterStage,
        work: &[(&FileHandle, &[FileHandle])],
        manifest: &Mutex<BuildManifest>,
    ) -> Result<Vec<TargetResult>, ExecutionError> {
        if self.jobs == 1 || work.len() <= 1 {
            return work
                .iter()
                .map(|(output, inputs)| self.execute_output(stage, output, inputs, manifest))
                .collect();
        }

        let results = Mutex::new(Vec::with_capacity(work.len()));
        let next_idx = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);

        std::thread::scope(|s| {
            for _ in 0..self.jobs.min(work.len()) {
                s.spawn(|| loop {
                    if failed.load(Ordering::SeqCst) {
                        break;
                    }

                    let idx = next_idx.fetch_add(1, Ordering::SeqCst);
                    let Some((output, inputs)) = work.get(idx) else {
                        break;
                    };

                    let result = self.execute_output(stage, output, inputs, manifest);
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    results
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push((idx, result));
                });
            }
        });

        // Sort by original index to keep deterministic order
        let mut results = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Generate a single output if it is stale.
    fn execute_output(
        &self,
        stage: &FilterStage,
        output: &FileHandle,
        inputs: &[FileHandle],
        manifest: &Mutex<BuildManifest>,
    ) -> Result<TargetResult, ExecutionError> {
        let recorded = lock(manifest).is_current(output, inputs);

        if recorded && !self.staleness.is_stale(output, inputs) {
            tracing::debug!("{} is up to date", output);
            return Ok(TargetResult::skipped(output.fullpath(), stage.name().to_string()));
        }

        let start = Instant::now();
        tracing::debug!("Building {} from {} input(s) with {}", output, inputs.len(), stage.name());

        if let Err(source) = output.write_with(|file| stage.generate_output(inputs, file)) {
            lock(manifest).remove(output);
            return Err(ExecutionError::Build { output: output.fullpath(), source });
        }

        lock(manifest).record_build(output, inputs);
        Ok(TargetResult::success(output.fullpath(), stage.name().to_string(), start.elapsed()))
    }
}

impl Executor for TaskGraphExecutor {
    fn execute(&self, pipeline: &Pipeline) -> Result<BuildResult, ExecutionError> {
        let start = Instant::now();

        let mut plan = Vec::new();
        for stage in pipeline.stages() {
            plan.push((stage, stage.outputs()?));
        }

        let staging_dir = pipeline.staging_dir();
        let manifest = Mutex::new(load_manifest(&staging_dir));

        let total_targets = plan.iter().map(|(_, outputs)| outputs.len()).sum();
        self.reporter.report(ProgressEvent::BuildStarted { total_targets });

        let mut result = BuildResult::new();
        for (stage, outputs) in &plan {
            let work: Vec<_> = outputs.iter().collect();
            let stage_results = match self.execute_stage(stage, &work, &manifest) {
                Ok(results) => results,
                Err(e) => {
                    // Keep the records of the outputs that did build
                    if let Err(save_error) = save_manifest(&manifest, &staging_dir) {
                        tracing::warn!("{}", save_error);
                    }
                    self.reporter.report(ProgressEvent::Error { message: e.to_string() });
                    return Err(e);
                }
            };

            for target in stage_results {
                self.reporter.report(ProgressEvent::TargetCompleted {
                    target_id: target.target_id(),
                    status: target.status,
                    duration_ms: target.duration.as_millis() as u64,
                });
                result.add_result(target);
            }
        }

        if let Err(e) = save_manifest(&manifest, &staging_dir) {
            self.reporter.report(ProgressEvent::Error { message: e.to_string() });
            return Err(e);
        }

        let result = result.with_duration(start.elapsed());
        self.reporter.report(ProgressEvent::BuildCompleted {
            duration_ms: result.total_duration.as_millis() as u64,
            built: result.success_count(),
            skipped: result.skipped_count(),
        });
        Ok(result)
    }
}

fn lock(manifest: &Mutex<BuildManifest>) -> MutexGuard<'_, BuildManifest> {
    manifest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Load the staging directory's manifest, starting over when it is unreadable.
fn load_manifest(staging_dir: &Path) -> BuildManifest {
    match BuildManifest::load_from_dir(staging_dir) {
        Ok(manifest) => manifest.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("Ignoring build manifest in {}: {}", staging_dir.display(), e);
            BuildManifest::new()
        }
    }
}

fn save_manifest(manifest: &Mutex<BuildManifest>, staging_dir: &Path) -> Result<(), ExecutionError> {
    lock(manifest)
        .save_to_dir(staging_dir)
        .map_err(|source| ExecutionError::Manifest { staging_dir: staging_dir.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{Branch, ConcatFilter, Filter, FilterStage, OutputFile, OutputName};
    use std::time::Duration;
    use tempfile::TempDir;

    struct FailingFilter;

    impl Filter for FailingFilter {
        fn name(&self) -> &str {
            "failing"
        }

        fn generate_output(
            &self,
            _inputs: &[FileHandle],
            output: &mut OutputFile,
        ) -> Result<(), FilterError> {
            output.write("partial")?;
            Err(FilterError::transform("failing", "boom"))
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn create_test_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn set_age(path: &Path, seconds: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(seconds)).unwrap();
    }

    fn copy_pipeline(temp: &TempDir) -> Pipeline {
        let mut pipeline =
            Pipeline::new(temp.path().join("app"), temp.path().join("public"), temp.path().join("tmp"))
                .with_branch(Branch::new("*.js"));
        pipeline.setup_filters().unwrap();
        pipeline
    }

    #[test]
    fn test_executor_with_options() {
        let executor = TaskGraphExecutor::new().with_jobs(0);
        assert_eq!(executor.jobs(), 1);
        assert_eq!(TaskGraphExecutor::new().with_jobs(8).jobs(), 8);
    }

    #[test]
    fn test_default_jobs() {
        assert!(default_jobs() >= 1);
    }

    #[test]
    fn test_mtime_staleness() {
        let temp = TempDir::new().unwrap();
        let input = create_test_file(temp.path(), "in.js", "x");
        let output = FileHandle::new(temp.path(), "out.js");
        let inputs = [FileHandle::new(temp.path(), "in.js")];

        assert!(MtimeStaleness.is_stale(&output, &inputs));

        create_test_file(temp.path(), "out.js", "x");
        set_age(&input, 60);
        assert!(!MtimeStaleness.is_stale(&output, &inputs));

        set_age(&output.fullpath(), 120);
        assert!(MtimeStaleness.is_stale(&output, &inputs));
    }

    #[test]
    fn test_mtime_staleness_missing_input() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "out.js", "x");
        let output = FileHandle::new(temp.path(), "out.js");
        assert!(MtimeStaleness.is_stale(&output, &[FileHandle::new(temp.path(), "gone.js")]));
    }

    #[test]
    fn test_always_stale() {
        let handle = FileHandle::new("/nowhere", "a.js");
        assert!(AlwaysStale.is_stale(&handle, &[]));
    }

    #[test]
    fn test_execute_builds_then_skips() {
        let temp = TempDir::new().unwrap();
        let input = create_test_file(&temp.path().join("app"), "a.js", "var a;");
        set_age(&input, 60);
        let pipeline = copy_pipeline(&temp);
        let executor = TaskGraphExecutor::new();

        let first = executor.execute(&pipeline).unwrap();
        assert_eq!(first.success_count(), 1);
        assert_eq!(fs::read_to_string(temp.path().join("public/a.js")).unwrap(), "var a;");

        let second = executor.execute(&pipeline).unwrap();
        assert_eq!(second.success_count(), 0);
        assert_eq!(second.skipped_count(), 1);
    }

    #[test]
    fn test_execute_always_stale_rebuilds() {
        let temp = TempDir::new().unwrap();
        create_test_file(&temp.path().join("app"), "a.js", "var a;");
        let pipeline = copy_pipeline(&temp);
        let executor = TaskGraphExecutor::new().with_staleness(AlwaysStale);

        executor.execute(&pipeline).unwrap();
        let second = executor.execute(&pipeline).unwrap();
        assert_eq!(second.success_count(), 1);
    }

    #[test]
    fn test_execute_rebuilds_when_inputs_change() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        set_age(&create_test_file(&app, "b.js", "b"), 60);
        let mut pipeline = Pipeline::new(&app, temp.path().join("public"), temp.path().join("tmp"))
            .with_branch(Branch::new("*.js").with_filter(
                FilterStage::new(ConcatFilter).with_output_name(OutputName::constant("all.js")),
            ));
        pipeline.setup_filters().unwrap();
        let executor = TaskGraphExecutor::new();
        executor.execute(&pipeline).unwrap();

        // A new input that is older than the output still forces a rebuild
        set_age(&create_test_file(&app, "a.js", "a"), 60);
        pipeline.setup_filters().unwrap();
        let result = executor.execute(&pipeline).unwrap();

        assert_eq!(result.success_count(), 1);
        assert_eq!(fs::read_to_string(temp.path().join("public/all.js")).unwrap(), "ab");
    }

    #[test]
    fn test_execute_parallel() {
        let temp = TempDir::new().unwrap();
        for i in 0..8 {
            create_test_file(&temp.path().join("app"), &format!("f{}.js", i), &i.to_string());
        }
        let pipeline = copy_pipeline(&temp);

        let result = TaskGraphExecutor::new().with_jobs(4).execute(&pipeline).unwrap();

        assert_eq!(result.success_count(), 8);
        let outputs: Vec<_> = result.targets.iter().map(|t| t.output.clone()).collect();
        let mut sorted = outputs.clone();
        sorted.sort();
        assert_eq!(outputs, sorted);
        for i in 0..8 {
            let path = temp.path().join(format!("public/f{}.js", i));
            assert_eq!(fs::read_to_string(path).unwrap(), i.to_string());
        }
    }

    #[test]
    fn test_execute_failure_aborts() {
        let temp = TempDir::new().unwrap();
        create_test_file(&temp.path().join("app"), "a.js", "a");
        let mut pipeline =
            Pipeline::new(temp.path().join("app"), temp.path().join("public"), temp.path().join("tmp"))
                .with_branch(Branch::new("*.js").with_filter(FilterStage::new(FailingFilter)));
        pipeline.setup_filters().unwrap();
        let progress = Arc::new(RecordingProgress::default());

        let err = TaskGraphExecutor::new()
            .with_reporter(progress.clone())
            .execute(&pipeline)
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Build { .. }));
        assert!(err.to_string().contains("boom"));
        let events = progress.events.lock().unwrap();
        assert!(matches!(events.last(), Some(ProgressEvent::Error { .. })));
    }

    #[test]
    fn test_execute_reports_progress() {
        let temp = TempDir::new().unwrap();
        create_test_file(&temp.path().join("app"), "a.js", "a");
        create_test_file(&temp.path().join("app"), "b.js", "b");
        let pipeline = copy_pipeline(&temp);
        let progress = Arc::new(RecordingProgress::default());

        TaskGraphExecutor::new().with_reporter(progress.clone()).execute(&pipeline).unwrap();

        let events = progress.events.lock().unwrap();
        assert!(matches!(events[0], ProgressEvent::BuildStarted { total_targets: 2 }));
        assert!(matches!(events[3], ProgressEvent::BuildCompleted { built: 2, skipped: 0, .. }));
    }

    #[test]
    fn test_execute_unset_pipeline_fails() {
        let temp = TempDir::new().unwrap();
        let pipeline =
            Pipeline::new(temp.path().join("app"), temp.path().join("public"), temp.path().join("tmp"))
                .with_branch(Branch::new("*.js").with_filter(FilterStage::new(ConcatFilter)));

        let err = TaskGraphExecutor::new().execute(&pipeline).unwrap_err();
        assert!(matches!(err, ExecutionError::Filter(FilterError::MissingRoot { .. })));
    }

    fn concat_pipeline(temp: &TempDir) -> Pipeline {
        let mut pipeline =
            Pipeline::new(temp.path().join("app"), temp.path().join("public"), temp.path().join("tmp"))
                .with_branch(Branch::new("*.js").with_filter(
                    FilterStage::new(ConcatFilter).with_output_name(OutputName::constant("all.js")),
                ));
        pipeline.setup_filters().unwrap();
        pipeline
    }

    #[test]
    fn test_execute_saves_manifest() {
        let temp = TempDir::new().unwrap();
        create_test_file(&temp.path().join("app"), "a.js", "a");
        let pipeline = concat_pipeline(&temp);

        TaskGraphExecutor::new().execute(&pipeline).unwrap();

        let manifest = BuildManifest::load_from_dir(&pipeline.staging_dir()).unwrap().unwrap();
        assert_eq!(
            manifest.inputs_of(&temp.path().join("public/all.js")),
            Some([temp.path().join("app/a.js")].as_slice())
        );
    }

    #[test]
    fn test_execute_removed_input_rebuilds_in_new_executor() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        set_age(&create_test_file(&app, "a.js", "a"), 60);
        set_age(&create_test_file(&app, "b.js", "b"), 60);
        TaskGraphExecutor::new().execute(&concat_pipeline(&temp)).unwrap();

        fs::remove_file(app.join("b.js")).unwrap();
        let result = TaskGraphExecutor::new().execute(&concat_pipeline(&temp)).unwrap();

        assert_eq!(result.success_count(), 1);
        assert_eq!(fs::read_to_string(temp.path().join("public/all.js")).unwrap(), "a");
    }

    #[test]
    fn test_execute_unrecorded_output_is_rebuilt() {
        let temp = TempDir::new().unwrap();
        set_age(&create_test_file(&temp.path().join("app"), "a.js", "new"), 60);
        create_test_file(&temp.path().join("public"), "a.js", "left over");
        let pipeline = copy_pipeline(&temp);

        let result = TaskGraphExecutor::new().execute(&pipeline).unwrap();

        assert_eq!(result.success_count(), 1);
        assert_eq!(fs::read_to_string(temp.path().join("public/a.js")).unwrap(), "new");
    }

    #[test]
    fn test_execute_unreadable_manifest_starts_over() {
        let temp = TempDir::new().unwrap();
        create_test_file(&temp.path().join("app"), "a.js", "a");
        let pipeline = copy_pipeline(&temp);
        create_test_file(&pipeline.staging_dir(), crate::build::MANIFEST_FILENAME, "{ not json");

        let result = TaskGraphExecutor::new().execute(&pipeline).unwrap();

        assert_eq!(result.success_count(), 1);
        assert!(BuildManifest::load_from_dir(&pipeline.staging_dir()).unwrap().is_some());
    }
}
