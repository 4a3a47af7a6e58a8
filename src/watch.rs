//! Watch mode for automatic rebuilds on file changes
//!
//! Provides file system watching with debouncing for the `assetpipe watch`
//! command. Edits to known inputs trigger a fast [`Runner::invoke`]; added or
//! removed files and Assetfile edits trigger [`Runner::invoke_clean`].

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::time::Duration;

use crate::build::{BuildResult, Runner, RunnerError};
use crate::config::load_assetfile;
use crate::config::schema::WatchConfig;

/// Error during watch mode
#[derive(Debug)]
pub enum WatchError {
    /// Failed to initialize file watcher
    WatcherInit(notify::Error),
    /// Failed to add watch path
    WatchPath(notify::Error),
    /// Channel receive error
    ChannelError(String),
    /// Watched directory not found
    SourceNotFound(PathBuf),
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::WatcherInit(e) => write!(f, "Failed to initialize file watcher: {}", e),
            WatchError::WatchPath(e) => write!(f, "Failed to watch path: {}", e),
            WatchError::ChannelError(msg) => write!(f, "Watch channel error: {}", msg),
            WatchError::SourceNotFound(path) => {
                write!(f, "Watch directory not found: {}", path.display())
            }
        }
    }
}

impl std::error::Error for WatchError {}

/// Options for watch mode
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Directory to watch recursively
    pub root: PathBuf,
    /// Watch configuration (debounce, clear screen)
    pub config: WatchConfig,
}

impl WatchOptions {
    /// Create options watching `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), config: WatchConfig::default() }
    }

    /// Set the watch configuration.
    pub fn with_config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }
}

/// How much work a batch of changes needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rebuild {
    /// Only known inputs changed content
    Invoke,
    /// Files were added or removed, or the configuration changed
    InvokeClean,
}

/// What the watcher knows about the current pipeline.
#[derive(Debug, Default)]
pub struct WatchState {
    /// Full paths of current inputs
    known_inputs: HashSet<PathBuf>,
    /// Directories the build writes to
    ignored: Vec<PathBuf>,
    /// Configuration file, if any
    assetfile: Option<PathBuf>,
}

impl WatchState {
    /// Snapshot the runner's inputs and output directories.
    pub fn from_runner(runner: &Runner) -> Self {
        let pipeline = runner.pipeline();
        Self {
            known_inputs: pipeline.source_files().into_iter().collect(),
            ignored: vec![pipeline.tmpdir().to_path_buf(), pipeline.output_root().to_path_buf()],
            assetfile: runner.configuration_path().map(Path::to_path_buf),
        }
    }

    /// Classify a batch of changed paths.
    ///
    /// Returns `None` when nothing relevant changed.
    pub fn classify<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> Option<Rebuild> {
        paths.into_iter().filter_map(|path| self.classify_path(path)).max()
    }

    fn classify_path(&self, path: &Path) -> Option<Rebuild> {
        if self.assetfile.as_deref() == Some(path) {
            return Some(Rebuild::InvokeClean);
        }
        if self.ignored.iter().any(|dir| path.starts_with(dir)) || path.is_dir() {
            return None;
        }

        match (self.known_inputs.contains(path), path.exists()) {
            (true, true) => Some(Rebuild::Invoke),
            (true, false) | (false, true) => Some(Rebuild::InvokeClean),
            (false, false) => None,
        }
    }
}

/// Clear the terminal screen
fn clear_screen() {
    // ANSI escape code to clear screen and move cursor to top-left
    print!("\x1B[2J\x1B[1;1H");
}

/// Format duration for display
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Get current timestamp for logging
fn timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs() % 86400; // seconds since midnight
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Re-read the `[watch]` table of the runner's configuration file.
///
/// Returns `None` for runners without a file, or when the file no longer
/// loads; the caller keeps its current settings then.
pub fn reload_watch_config(runner: &Runner) -> Option<WatchConfig> {
    let path = runner.configuration_path()?;
    match load_assetfile(path) {
        Ok(config) => Some(config.watch),
        Err(e) => {
            tracing::warn!("Keeping previous watch settings: {}", e);
            None
        }
    }
}

fn start_debouncer(
    root: &Path,
    debounce_ms: u32,
    tx: Sender<DebounceEventResult>,
) -> Result<Debouncer<RecommendedWatcher>, WatchError> {
    let debounce_duration = Duration::from_millis(debounce_ms as u64);
    let mut debouncer = new_debouncer(debounce_duration, tx).map_err(WatchError::WatcherInit)?;
    debouncer.watcher().watch(root, RecursiveMode::Recursive).map_err(WatchError::WatchPath)?;
    Ok(debouncer)
}

/// Perform a single build iteration.
pub fn do_build(runner: &mut Runner, rebuild: Rebuild) -> Result<BuildResult, RunnerError> {
    match rebuild {
        Rebuild::Invoke => runner.invoke(),
        Rebuild::InvokeClean => runner.invoke_clean(),
    }
}

/// Watch for file changes and rebuild automatically.
///
/// This function blocks and runs until interrupted (Ctrl+C). Build failures
/// are printed and watching continues with the last good pipeline. When a
/// build reloads the Assetfile, its `[watch]` table is applied as well.
///
/// # Example
/// ```ignore
/// let options = WatchOptions::new("site").with_config(config.watch.clone());
/// watch_and_rebuild(&mut runner, options)?;
/// ```
pub fn watch_and_rebuild(runner: &mut Runner, mut options: WatchOptions) -> Result<(), WatchError> {
    if !options.root.exists() {
        return Err(WatchError::SourceNotFound(options.root.clone()));
    }

    let (tx, rx) = channel();
    let mut _debouncer = start_debouncer(&options.root, options.config.debounce_ms, tx.clone())?;

    // Initial build
    if options.config.clear_screen {
        clear_screen();
    }
    println!("[{}] Building...", timestamp());
    print_build_result(&do_build(runner, Rebuild::InvokeClean));
    let mut state = WatchState::from_runner(runner);
    println!("[{}] Watching {} for changes...", timestamp(), options.root.display());

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let changed: Vec<&Path> = events
                    .iter()
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .map(|e| e.path.as_path())
                    .collect();

                let Some(rebuild) = state.classify(changed.iter().copied()) else {
                    continue;
                };

                for path in &changed {
                    if let Some(name) = path.file_name() {
                        println!("[{}] Changed: {}", timestamp(), name.to_string_lossy());
                    }
                }

                if options.config.clear_screen {
                    clear_screen();
                }

                tracing::debug!("Rebuilding ({:?})", rebuild);
                println!("[{}] Building...", timestamp());
                let rebuilds = runner.rebuild_count();
                print_build_result(&do_build(runner, rebuild));
                state = WatchState::from_runner(runner);

                if runner.rebuild_count() != rebuilds {
                    if let Some(config) = reload_watch_config(runner) {
                        if config.debounce_ms != options.config.debounce_ms {
                            _debouncer =
                                start_debouncer(&options.root, config.debounce_ms, tx.clone())?;
                        }
                        options.config = config;
                    }
                }

                println!("[{}] Watching {} for changes...", timestamp(), options.root.display());
            }
            Ok(Err(error)) => {
                // Watch error (non-fatal) - log but continue watching
                eprintln!("[{}] Watch error: {:?}", timestamp(), error);
                eprintln!("[{}] Continuing to watch...", timestamp());
            }
            Err(e) => {
                return Err(WatchError::ChannelError(e.to_string()));
            }
        }
    }
}

/// Print build result to console
fn print_build_result(result: &Result<BuildResult, RunnerError>) {
    match result {
        Ok(result) => println!(
            "[{}] Build complete ({}) - Built: {} | Up to date: {}",
            timestamp(),
            format_duration(result.total_duration),
            result.success_count(),
            result.skipped_count()
        ),
        Err(error) => eprintln!("[{}] Build failed: {}", timestamp(), error),
    }
}
