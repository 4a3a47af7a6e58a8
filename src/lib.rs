//! assetpipe - Library for building derived assets through filter pipelines
//!
//! This library provides functionality to:
//! - Describe pipelines of filters over globs of source files
//! - Stage intermediate outputs per configuration version
//! - Rebuild only stale outputs, and reload when the configuration changes

pub mod build;
pub mod cli;
pub mod config;
pub mod watch;
