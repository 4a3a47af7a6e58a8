//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use build::RunnerSettings;

/// Process exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// assetpipe - Build derived assets from source files through filter pipelines
#[derive(Parser)]
#[command(name = "assetpipe")]
#[command(about = "Build derived assets from source files through filter pipelines")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build every pipeline output once
    Build {
        /// Path to Assetfile.toml (default: search upward from the current directory)
        #[arg(short, long)]
        assetfile: Option<PathBuf>,

        /// Reuse file lists from the last setup instead of re-expanding globs
        #[arg(long)]
        no_clean: bool,

        /// Worker threads per stage (overrides build.jobs)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Regenerate every output even when up to date
        #[arg(short, long)]
        force: bool,

        /// Emit progress as JSON lines on stderr
        #[arg(long)]
        json: bool,
    },

    /// Rebuild whenever inputs or the Assetfile change
    Watch {
        /// Path to Assetfile.toml (default: search upward from the current directory)
        #[arg(short, long)]
        assetfile: Option<PathBuf>,

        /// Worker threads per stage (overrides build.jobs)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Remove every output and staging directory
    Clobber {
        /// Path to Assetfile.toml (default: search upward from the current directory)
        #[arg(short, long)]
        assetfile: Option<PathBuf>,
    },

    /// Print the staging directory name a configuration file maps to
    Digest {
        /// Configuration file to hash
        file: PathBuf,
    },
}

/// Install the stderr tracing subscriber.
///
/// `RUST_LOG` takes precedence over the flags.
fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);
    let verbose = cli.verbose;

    match cli.command {
        Commands::Build { assetfile, no_clean, jobs, force, json } => build::run_build(
            RunnerSettings { assetfile: assetfile.as_deref(), jobs, force, json, verbose },
            no_clean,
        ),
        Commands::Watch { assetfile, jobs } => build::run_watch(RunnerSettings {
            assetfile: assetfile.as_deref(),
            jobs,
            force: false,
            json: false,
            verbose,
        }),
        Commands::Clobber { assetfile } => build::run_clobber(RunnerSettings {
            assetfile: assetfile.as_deref(),
            jobs: None,
            force: false,
            json: false,
            verbose,
        }),
        Commands::Digest { file } => build::run_digest(&file),
    }
}
