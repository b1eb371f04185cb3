//! The things a run can harvest.
//!
//! A [`Subject`] knows which graph root it queries, which fields and
//! connections it wants on the first round, and which REST, scrape, and clone
//! tasks it can queue before the run starts. Everything else is discovered by
//! the engine while pages come in.

mod owner;
mod repository;
mod users;

pub use owner::{Owner, OwnerKind, organizations_pager, sponsorable_fragment};
pub use repository::Repository;
pub use users::{MultiUser, user_alias};

use crate::Result;
use crate::engine::{AggregateError, Aggregator, ChannelKind, Channels, GraphPlan, Phase, Task};
use crate::graph::{GraphTransport, Query};
use crate::policy::{RATE_LIMIT_KEY, RetryPolicy};
use crate::progress::Progress;
use crate::rest::RestClient;
use crate::scrape::WebClient;
use chrono::{DateTime, Utc};
use core::fmt::{Debug, Display};
use core::time::Duration;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use url::Url;

const LOG_TARGET: &str = "    engine";

/// Default number of items requested per connection page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// The non-graph data sources subjects build their tasks on.
#[derive(Debug, Clone)]
pub struct Sources {
    pub rest: Arc<RestClient>,
    pub web: Arc<WebClient>,
    /// Base of clone URLs, e.g. `https://github.com/`.
    pub clone_url: Url,
    pub git_timeout: Duration,
    pub page_size: u32,
    /// Time-ordered connections stop paginating once they reach items older than this.
    pub since: Option<DateTime<Utc>>,
}

/// One logical entity to harvest.
pub trait Subject: Debug + Display + Send + Sync {
    /// The root fields every graph round starts from, without sub-selections.
    fn base_query(&self) -> Query;

    /// Select the first round's fields, register pagers, and queue the tasks
    /// known before any page has been seen.
    fn prepare(&self, plan: &mut GraphPlan, channels: &Arc<Channels>, sources: &Sources) -> Result<()>;
}

/// Build an engine run for `subject`.
pub fn aggregator(
    subject: &dyn Subject,
    transport: Arc<dyn GraphTransport>,
    policy: RetryPolicy,
    sources: &Sources,
) -> Result<Aggregator> {
    let mut aggregator = Aggregator::new(transport, policy, subject.base_query());
    let channels = Arc::clone(aggregator.channels());
    subject.prepare(aggregator.plan_mut(), &channels, sources)?;

    log::debug!(
        target: LOG_TARGET,
        "Prepared {subject}: {} pager(s), {} rest, {} scrape, {} clone task(s) queued",
        aggregator.plan().rule_count(),
        channels.counts(ChannelKind::Rest).0,
        channels.counts(ChannelKind::Scrape).0,
        channels.counts(ChannelKind::Clone).0,
    );

    Ok(aggregator)
}

/// Harvest `subject` and return the merged result tree.
///
/// With `rate_limit`, graph rounds report their cost and the REST channel
/// also records the REST quotas under `rateLimit`.
pub async fn aggregate(
    subject: &dyn Subject,
    transport: Arc<dyn GraphTransport>,
    policy: RetryPolicy,
    sources: &Sources,
    rate_limit: bool,
    progress: Option<Arc<dyn Progress>>,
) -> core::result::Result<Value, AggregateError> {
    let mut aggregator = aggregator(subject, transport, policy, sources)
        .map_err(|e| AggregateError::new(ChannelKind::Graph, Phase::Setup, e))?
        .with_rate_limit(rate_limit);

    if rate_limit {
        let _ = aggregator.channels().enqueue(ChannelKind::Rest, rate_limit_task(&sources.rest));
    }

    if let Some(progress) = progress {
        aggregator = aggregator.with_progress(progress);
    }

    aggregator.run().await
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    let _ = map.insert(key.to_string(), value);
    Value::Object(map)
}

/// A REST fetch stored under `key`. Listings follow every page; a missing
/// resource yields `null`.
fn rest_task(rest: &Arc<RestClient>, key: &'static str, path: String, listing: bool) -> Task {
    let rest = Arc::clone(rest);
    Task::new(key, move || async move {
        let value = if listing {
            Value::Array(rest.get_all_pages(&path).await?)
        } else {
            rest.get_optional(&path).await?.unwrap_or(Value::Null)
        };
        Ok(single(key, value))
    })
}

/// The REST `core` and `search` quotas, stored under `rateLimit`.
fn rate_limit_task(rest: &Arc<RestClient>) -> Task {
    let rest = Arc::clone(rest);
    Task::new(RATE_LIMIT_KEY, move || async move {
        let snapshot = rest.get_json("rate_limit").await?;
        let resources = &snapshot["resources"];
        Ok(single(
            RATE_LIMIT_KEY,
            json!({ "core": resources["core"].clone(), "search": resources["search"].clone() }),
        ))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::policy::CallOutcome;
    use crate::tokens::TokenPool;
    use futures::future::BoxFuture;
    use ohno::app_err;

    #[derive(Debug)]
    struct NoTransport;

    impl GraphTransport for NoTransport {
        fn execute<'a>(&'a self, _query: &'a Query) -> BoxFuture<'a, CallOutcome<Value>> {
            Box::pin(async { CallOutcome::Fatal(app_err!("no transport")) })
        }
    }

    /// Sources pointing at an unroutable host; building them never touches the network.
    pub(crate) fn test_sources(since: Option<DateTime<Utc>>) -> Sources {
        let policy = RetryPolicy::new(tick::Clock::new_tokio());
        let base = Url::parse("http://127.0.0.1:9/").unwrap();
        let timeout = Duration::from_secs(1);

        Sources {
            rest: Arc::new(RestClient::new(&base, Arc::new(TokenPool::anonymous()), policy.clone(), timeout).unwrap()),
            web: Arc::new(WebClient::new(base.clone(), policy, timeout).unwrap()),
            clone_url: base,
            git_timeout: timeout,
            page_size: DEFAULT_PAGE_SIZE,
            since,
        }
    }

    #[test]
    fn single_wraps_value_under_key() {
        assert_eq!(single("dependents", 3.into()), serde_json::json!({ "dependents": 3 }));
    }

    #[tokio::test]
    async fn aggregator_is_prepared_from_subject() {
        let repo = Repository::new("acme", "widget");
        let transport: Arc<dyn GraphTransport> = Arc::new(NoTransport);
        let sources = test_sources(None);
        let aggregator = aggregator(&repo, transport, RetryPolicy::new(tick::Clock::new_tokio()), &sources).unwrap();

        assert_eq!(aggregator.plan().rule_count(), 5);
        assert_eq!(aggregator.channels().counts(ChannelKind::Rest), (4, 0));
    }
}
