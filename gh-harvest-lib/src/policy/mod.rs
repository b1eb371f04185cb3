//! Resilience for outbound calls: throttling, retries, and rate-limit accounting.

mod outcome;
mod rate_limit;
mod retry;

pub use outcome::{CallOutcome, FailureKind};
pub use rate_limit::{ADDITIVE_COUNTERS, RATE_LIMIT_KEY, RateLimitHeaders, RateLimitState, classify_http_failure, merge_page};
pub use retry::{
    DEFAULT_FALLBACK_WAIT, DEFAULT_GRACE_PERIOD, DEFAULT_MAX_FLAKY_RETRIES, DEFAULT_MAX_TRANSIENT_RETRIES, RetryPolicy,
};
