//! Configuration module for assetpipe
//!
//! Provides types, parsing, and pipeline construction for `Assetfile.toml`.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
