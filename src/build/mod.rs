//! Asset build core.
//!
//! Turns a tree of source files into a tree of derived artifacts through
//! chains of filters, with per-configuration staging and incremental
//! rebuilds.
//!
//! # Overview
//!
//! The build core consists of:
//! - **Files**: [`FileHandle`] values and [`OutputFile`] write sessions
//! - **Filters**: [`FilterStage`] maps inputs to outputs through an [`OutputName`]
//! - **Pipelines**: [`Pipeline`] wires branches of stages through staging directories
//! - **Execution**: [`TaskGraphExecutor`] generates the stale outputs
//! - **Lifecycle**: [`Runner`] reloads the pipeline when its configuration changes
//!
//! # Example
//!
//! ```ignore
//! use assetpipe::build::{Runner, TaskGraphExecutor};
//! use assetpipe::config::AssetfileLoader;
//! use std::sync::Arc;
//!
//! let executor = Arc::new(TaskGraphExecutor::new().with_jobs(4));
//! let mut runner = Runner::from_path("Assetfile.toml", AssetfileLoader::default(), executor)?;
//!
//! let result = runner.invoke_clean()?;
//! println!("{}", result.summary());
//! ```

pub mod discovery;
pub mod executor;
pub mod file;
pub mod filter;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod result;
pub mod runner;
pub mod staging;

pub use discovery::*;
pub use executor::*;
pub use file::*;
pub use filter::*;
pub use manifest::*;
pub use pipeline::*;
pub use progress::*;
pub use result::*;
pub use runner::*;
pub use staging::{cleanup_stale, digest, namespace_for, STAGING_PREFIX};
