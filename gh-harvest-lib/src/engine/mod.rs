//! The multi-channel aggregation engine.
//!
//! One run has four workers: a [`PaginationDriver`] that walks the graph query
//! page by page, and a runner for each of the REST, scrape, and clone
//! [`Channel`]s. Pages discovered by the driver may enqueue [`Task`]s on the
//! other channels. The [`Aggregator`] starts all workers, waits for them, and
//! deep-merges their outputs.

mod aggregator;
mod channel;
mod driver;
mod error;
mod pagination;
mod runner;
mod task;
mod tracker;

pub use aggregator::Aggregator;
pub use channel::{Channel, ChannelKind, Channels};
pub use driver::{DriverState, GraphPlan, PaginationDriver};
pub use error::{AggregateError, Phase};
pub use pagination::{Action, ConnectionPager, DiscoveryHook, ItemsKey, NextRound, PageRequest, PaginationRule, RuleOutcome};
pub use runner::run_channel;
pub use task::Task;
pub use tracker::ChannelTracker;
