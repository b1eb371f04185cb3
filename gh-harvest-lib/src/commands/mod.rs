//! Command-line interface and orchestration for gh-harvest
//!
//! Each harvest subcommand names a subject (a repository, a user, an
//! organization, or a group of users), builds the clients described by the
//! configuration file, runs the aggregation engine, and writes the merged
//! result tree as JSON.
//!
//! ## Commands
//!
//! - **repo**: Harvest one repository through the graph API, the REST API,
//!   the dependents page, and a local clone
//! - **user** / **org** / **owner**: Harvest a user or organization profile with
//!   its repositories
//! - **users**: Harvest several user profiles in one graph query
//! - **init**: Generate a default configuration file
//!
//! The `common` module holds the arguments and the harvest workflow shared by
//! every subcommand.

mod common;
mod config;
mod host;
mod init;
mod progress_reporter;
mod run;

#[cfg(debug_assertions)]
pub use config::Config;

pub use common::{CommonArgs, harvest};
pub use host::Host;
pub use init::{InitArgs, init_config};
pub use progress_reporter::ProgressReporter;
pub use run::run;
