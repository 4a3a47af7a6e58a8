//! assetpipe - Command-line tool for building asset pipelines

use std::process::ExitCode;

use assetpipe::cli;

fn main() -> ExitCode {
    cli::run()
}
