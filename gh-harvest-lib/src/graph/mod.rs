//! Graph queries: a small builder for query documents and the HTTPS transport.

mod client;
mod query;

pub use client::{FLAKY_MESSAGE, FLAKY_PATH, GraphClient, GraphTransport, rate_limit_field};
pub use query::{Arg, Field, Query, Selection};
