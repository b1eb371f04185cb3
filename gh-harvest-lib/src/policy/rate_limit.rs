use super::CallOutcome;
use crate::tree;
use chrono::{DateTime, Utc};
use ohno::app_err;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level key of the rate-limit sub-tree in graph responses.
pub const RATE_LIMIT_KEY: &str = "rateLimit";

/// Counters that accumulate across pages instead of being overwritten.
pub const ADDITIVE_COUNTERS: [&str; 2] = ["cost", "nodeCount"];

/// Rate-limit accounting reported by the graph API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitState {
    #[serde(default)]
    pub cost: u64,
    #[serde(default)]
    pub node_count: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub remaining: u64,
    #[serde(default)]
    pub used: u64,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Read the `rateLimit` sub-tree of a result tree, if present.
    #[must_use]
    pub fn from_tree(tree: &Value) -> Option<Self> {
        let sub_tree = tree.get(RATE_LIMIT_KEY)?;
        serde_json::from_value(sub_tree.clone()).ok()
    }
}

/// Merge one graph page into the accumulator, then fold the rate-limit counters.
///
/// `cost` and `nodeCount` are summed across pages; every other `rateLimit` field
/// keeps the value of the latest page.
pub fn merge_page(acc: &mut Value, page: Value) {
    let previous: Vec<(&str, u64)> = ADDITIVE_COUNTERS
        .iter()
        .filter_map(|&counter| Some((counter, counter_value(acc, counter)?)))
        .collect();

    tree::merge_into(acc, page);

    let Some(rate_limit) = acc.get_mut(RATE_LIMIT_KEY).and_then(Value::as_object_mut) else {
        return;
    };

    for (counter, before) in previous {
        if let Some(latest) = rate_limit.get(counter).and_then(Value::as_u64) {
            let _ = rate_limit.insert(counter.to_string(), Value::from(before + latest));
        }
    }
}

fn counter_value(tree: &Value, counter: &str) -> Option<u64> {
    tree.get(RATE_LIMIT_KEY)?.get(counter)?.as_u64()
}

/// Rate-limit information carried in HTTP response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
}

impl RateLimitHeaders {
    /// Extract `x-ratelimit-remaining`, `x-ratelimit-reset`, and `retry-after`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Self {
        let header_u64 = |name: &str| headers.get(name)?.to_str().ok()?.trim().parse::<u64>().ok();

        let reset_at = header_u64("x-ratelimit-reset")
            .and_then(|ts| i64::try_from(ts).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|secs| now + chrono::Duration::seconds(secs));

        Self {
            remaining: header_u64("x-ratelimit-remaining"),
            reset_at,
            retry_after,
        }
    }

    /// Whether a response with `status` and these headers is a throttle.
    ///
    /// 429 always is. A 403 only counts when the quota is exhausted or the server
    /// asks us to back off; any other 403 is a permission denial.
    #[must_use]
    pub fn is_throttled(&self, status: StatusCode) -> bool {
        match status {
            StatusCode::TOO_MANY_REQUESTS => true,
            StatusCode::FORBIDDEN => self.remaining == Some(0) || self.retry_after.is_some(),
            _ => false,
        }
    }

    /// When the throttle lifts, preferring the explicit `retry-after`.
    #[must_use]
    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        self.retry_after.or(self.reset_at)
    }
}

/// Classify an unsuccessful HTTP status for the retry policy.
///
/// Throttles carry their reset time, 5xx responses are transient, and
/// everything else is fatal.
#[must_use]
pub fn classify_http_failure<T>(status: StatusCode, headers: &RateLimitHeaders, url: &str) -> CallOutcome<T> {
    if headers.is_throttled(status) {
        return CallOutcome::Throttled {
            reset_at: headers.resume_at(),
        };
    }

    if status.is_server_error() {
        return CallOutcome::Transient(app_err!("server error {status} from '{url}'"));
    }

    CallOutcome::Fatal(app_err!("request to '{url}' failed with status {status}"))
}
