//! Pipeline command implementations (build, watch, clobber, digest)

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::{
    AlwaysStale, ConsoleProgress, Executor, JsonProgress, LoadError, NullProgress,
    ProgressReporter, Runner, TaskGraphExecutor,
};
use crate::config::{
    find_assetfile, load_assetfile, parse_assetfile, project_root, AssetfileConfig,
    AssetfileLoader, StalenessMode,
};

/// Settings shared by the commands that open a runner.
pub struct RunnerSettings<'a> {
    /// Explicit Assetfile path
    pub assetfile: Option<&'a Path>,
    /// Override for `build.jobs`
    pub jobs: Option<usize>,
    /// Regenerate every output
    pub force: bool,
    /// Emit JSON progress lines
    pub json: bool,
    /// List skipped outputs
    pub verbose: bool,
}

impl RunnerSettings<'_> {
    fn executor_overrides(&self) -> ExecutorOverrides {
        ExecutorOverrides {
            jobs: self.jobs,
            force: self.force,
            json: self.json,
            verbose: self.verbose,
        }
    }
}

/// CLI flags that shape every executor, including ones built after a reload.
#[derive(Debug, Clone, Copy, Default)]
struct ExecutorOverrides {
    jobs: Option<usize>,
    force: bool,
    json: bool,
    verbose: bool,
}

/// Find the Assetfile to use, printing an error when there is none.
fn resolve_assetfile(assetfile: Option<&Path>) -> Result<PathBuf, ExitCode> {
    match assetfile {
        Some(path) => Ok(path.to_path_buf()),
        None => find_assetfile().ok_or_else(|| {
            eprintln!("Error: No Assetfile.toml found in this directory or any parent");
            eprintln!("Create one or pass --assetfile");
            ExitCode::from(EXIT_INVALID_ARGS)
        }),
    }
}

/// Build the executor described by the configuration and CLI overrides.
fn make_executor(config: &AssetfileConfig, settings: ExecutorOverrides) -> TaskGraphExecutor {
    let reporter: Arc<dyn ProgressReporter> = if settings.json {
        Arc::new(JsonProgress::new())
    } else if settings.verbose {
        Arc::new(
            ConsoleProgress::new()
                .with_colors(std::io::stderr().is_terminal())
                .with_verbose(true),
        )
    } else {
        Arc::new(NullProgress)
    };

    let executor = TaskGraphExecutor::new()
        .with_jobs(settings.jobs.unwrap_or(config.build.jobs))
        .with_reporter(reporter);

    if settings.force || config.build.staleness == StalenessMode::Always {
        executor.with_staleness(AlwaysStale)
    } else {
        executor
    }
}

/// Load the Assetfile and open a runner over it.
fn open_runner(settings: &RunnerSettings<'_>) -> Result<(Runner, AssetfileConfig), ExitCode> {
    let path = resolve_assetfile(settings.assetfile)?;
    if settings.verbose {
        println!("Using Assetfile: {}", path.display());
    }

    let config = load_assetfile(&path).map_err(|e| {
        eprintln!("Error loading {}: {}", path.display(), e);
        ExitCode::from(EXIT_ERROR)
    })?;

    let overrides = settings.executor_overrides();
    let executor = Arc::new(make_executor(&config, overrides));
    let runner = Runner::from_path(&path, AssetfileLoader::default(), executor)
        .map_err(|e| {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        })?
        .with_executor_factory(move |source: &str, _path: &Path| {
            let config = parse_assetfile(source)?;
            let executor: Arc<dyn Executor> = Arc::new(make_executor(&config, overrides));
            Ok::<_, LoadError>(executor)
        });

    Ok((runner, config))
}

/// Run the build command
pub fn run_build(settings: RunnerSettings<'_>, no_clean: bool) -> ExitCode {
    let (mut runner, _config) = match open_runner(&settings) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    if settings.force && !settings.json {
        println!("Building (force rebuild)...");
    }

    let result = if no_clean { runner.invoke() } else { runner.invoke_clean() };
    match result {
        Ok(result) => {
            if !settings.json {
                println!("{}", result.summary());
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Build error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run the watch command
pub fn run_watch(settings: RunnerSettings<'_>) -> ExitCode {
    let (mut runner, config) = match open_runner(&settings) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let root = match runner.configuration_path().map(project_root) {
        Some(Ok(root)) => root,
        Some(Err(e)) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
        None => return ExitCode::from(EXIT_ERROR),
    };

    println!("Starting watch mode...");
    println!("Press Ctrl+C to stop");
    println!();

    let options = crate::watch::WatchOptions::new(root).with_config(config.watch);
    match crate::watch::watch_and_rebuild(&mut runner, options) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Watch error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run the clobber command
pub fn run_clobber(settings: RunnerSettings<'_>) -> ExitCode {
    let (mut runner, _config) = match open_runner(&settings) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    match runner.clobber() {
        Ok(()) => {
            println!("Removed build outputs and staging directories");
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Clobber error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run the digest command
pub fn run_digest(file: &Path) -> ExitCode {
    match std::fs::read_to_string(file) {
        Ok(source) => {
            println!("{}", crate::build::namespace_for(&crate::build::digest(&source)));
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error reading {}: {}", file.display(), e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
