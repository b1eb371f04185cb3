#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for gh-harvest
//!
//! gh-harvest builds one JSON tree describing a GitHub repository, user, or
//! organization. Paginated graph queries, flat REST calls, page scraping, and
//! local clone analysis run concurrently and their outputs are deep-merged.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface and orchestration
//! - [`subjects`]: What gets harvested for each kind of subject
//! - [`engine`]: Channels, the pagination driver, and the aggregator
//! - [`graph`], [`rest`], [`scrape`], [`clone`]: The four data sources
//! - [`policy`]: Throttling and retry of outbound calls
//! - [`tree`]: Merging of partial result trees

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[cfg(any(debug_assertions, test))]
pub mod commands;
#[cfg(not(any(debug_assertions, test)))]
mod commands;

pub mod clone;
pub mod engine;
pub mod graph;
pub mod policy;
pub mod progress;
pub mod rest;
pub mod scrape;
pub mod subjects;
pub mod tokens;
pub mod tree;

pub use crate::commands::{Host, run};
