//! Build progress reporting.
//!
//! The executor reports one event when an invocation starts, one per output
//! file, and one when it completes. Reporters render these for humans
//! ([`ConsoleProgress`]), for tools ([`JsonProgress`]), or not at all
//! ([`NullProgress`]).
//!
//! # Example
//!
//! ```ignore
//! use assetpipe::build::progress::{ConsoleProgress, ProgressEvent, ProgressReporter};
//!
//! let reporter = ConsoleProgress::new();
//! reporter.report(ProgressEvent::BuildStarted { total_targets: 2 });
//! ```

use crate::build::BuildStatus;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Events that can be reported during a build.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Invocation started
    BuildStarted {
        /// Total number of outputs across all stages
        total_targets: usize,
    },
    /// An output was built or skipped
    TargetCompleted {
        /// Target identifier
        target_id: String,
        /// Build status
        status: BuildStatus,
        /// Duration in milliseconds
        duration_ms: u64,
    },
    /// Invocation completed
    BuildCompleted {
        /// Total duration in milliseconds
        duration_ms: u64,
        /// Number of regenerated outputs
        built: usize,
        /// Number of up-to-date outputs
        skipped: usize,
    },
    /// An invocation aborted
    Error {
        /// Error message
        message: String,
    },
}

/// Trait for progress reporters.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event.
    fn report(&self, event: ProgressEvent);
}

/// A progress reporter that discards all events.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Console progress reporter with optional colors.
pub struct ConsoleProgress {
    /// Whether to use colors
    use_colors: bool,
    /// Whether to list skipped outputs
    verbose: bool,
    /// Completed outputs in the current build
    current: AtomicUsize,
    /// Total outputs in the current build
    total: AtomicUsize,
    /// Output writer
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ConsoleProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleProgress")
            .field("use_colors", &self.use_colors)
            .field("verbose", &self.verbose)
            .field("current", &self.current)
            .field("total", &self.total)
            .finish()
    }
}

impl ConsoleProgress {
    /// Create a console reporter writing to stderr.
    pub fn new() -> Self {
        Self {
            use_colors: true,
            verbose: false,
            current: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            output: Mutex::new(Box::new(std::io::stderr())),
        }
    }

    /// Create a console reporter that writes to a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self {
            use_colors: false,
            verbose: false,
            current: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            output: Mutex::new(Box::new(output)),
        }
    }

    /// Set whether to use colors.
    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn color(&self, text: &str, code: &str) -> String {
        if self.use_colors {
            format!("{}{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn writeln(&self, line: &str) {
        if let Ok(mut output) = self.output.lock() {
            let _ = writeln!(output, "{}", line);
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ConsoleProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::BuildStarted { total_targets } => {
                self.total.store(total_targets, Ordering::SeqCst);
                self.current.store(0, Ordering::SeqCst);
                if total_targets > 0 {
                    self.writeln(&format!(
                        "{} Checking {} output{}...",
                        self.color("[build]", "\x1b[36m"),
                        total_targets,
                        if total_targets == 1 { "" } else { "s" }
                    ));
                }
            }
            ProgressEvent::TargetCompleted { target_id, status, duration_ms } => {
                let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                if status == BuildStatus::Skipped && !self.verbose {
                    return;
                }

                let status_str = match status {
                    BuildStatus::Success => self.color("ok", "\x1b[32m"),
                    BuildStatus::Skipped => self.color("skipped", "\x1b[33m"),
                };
                self.writeln(&format!(
                    "{} [{}/{}] {} {} ({})",
                    self.color("[build]", "\x1b[36m"),
                    current,
                    self.total.load(Ordering::SeqCst),
                    status_str,
                    target_id,
                    format_duration(duration_ms)
                ));
            }
            ProgressEvent::BuildCompleted { duration_ms, built, skipped } => {
                self.writeln(&format!(
                    "{} {} built, {} skipped in {}",
                    self.color("[done]", "\x1b[32m"),
                    built,
                    skipped,
                    format_duration(duration_ms)
                ));
            }
            ProgressEvent::Error { message } => {
                self.writeln(&format!("{} {}", self.color("[error]", "\x1b[31m"), message));
            }
        }
    }
}

/// JSON lines progress reporter for machine-readable output.
pub struct JsonProgress {
    /// Output writer
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonProgress").finish()
    }
}

impl JsonProgress {
    /// Create a JSON reporter writing to stderr.
    pub fn new() -> Self {
        Self { output: Mutex::new(Box::new(std::io::stderr())) }
    }

    /// Create a JSON reporter that writes to a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self { output: Mutex::new(Box::new(output)) }
    }
}

impl Default for JsonProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let value = match event {
            ProgressEvent::BuildStarted { total_targets } => serde_json::json!({
                "event": "build_started",
                "total_targets": total_targets,
            }),
            ProgressEvent::TargetCompleted { target_id, status, duration_ms } => serde_json::json!({
                "event": "target_completed",
                "target_id": target_id,
                "status": status.to_string(),
                "duration_ms": duration_ms,
            }),
            ProgressEvent::BuildCompleted { duration_ms, built, skipped } => serde_json::json!({
                "event": "build_completed",
                "duration_ms": duration_ms,
                "built": built,
                "skipped": skipped,
            }),
            ProgressEvent::Error { message } => serde_json::json!({
                "event": "error",
                "message": message,
            }),
        };

        if let Ok(mut output) = self.output.lock() {
            let _ = writeln!(output, "{}", value);
        }
    }
}

/// Format a duration in milliseconds to a human-readable string.
fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let minutes = ms / 60_000;
        let seconds = (ms % 60_000) / 1000;
        format!("{}m {}s", minutes, seconds)
    }
}
