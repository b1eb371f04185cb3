//! The flat REST channel's HTTP client.

mod client;

pub use client::{MAX_PAGES, RestClient};
