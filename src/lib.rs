//! clusterlogs - a cluster's per-server logs as one live, queryable table
//!
//! - `logs`: the table, its change feed, and the log transports
//! - `observability`: structured logging and feed counters
//! - `cli`: the `clusterlogs` command-line front end

pub mod cli;
pub mod logs;
pub mod observability;
