//! CLI module for clusterlogs
//!
//! Provides command-line access to the logs table of a locally described
//! cluster:
//! - scan: Print every row
//! - get: Point lookup by primary key
//! - watch: Initial rows, then the change feed

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{get, run, run_command, scan, watch, ClusterConfig, ServerConfig};
pub use errors::{CliError, CliResult};
pub use io::write_response;
