use super::{AggregateError, ChannelKind, ChannelTracker, Channels, GraphPlan, PaginationDriver, Phase, run_channel};
use crate::graph::{GraphTransport, Query};
use crate::policy::RetryPolicy;
use crate::progress::Progress;
use crate::tree;
use ohno::app_err;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

const LOG_TARGET: &str = "    engine";

const TASK_CHANNELS: [ChannelKind; 3] = [ChannelKind::Rest, ChannelKind::Scrape, ChannelKind::Clone];

/// Runs the pagination driver and the task channel runners concurrently and
/// folds their outputs into one result tree.
pub struct Aggregator {
    transport: Arc<dyn GraphTransport>,
    policy: RetryPolicy,
    channels: Arc<Channels>,
    plan: GraphPlan,
    rate_limit: bool,
    progress: Option<Arc<dyn Progress>>,
}

impl core::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Aggregator")
            .field("transport", &self.transport)
            .field("channels", &self.channels)
            .field("plan", &self.plan)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Create an engine whose graph rounds start from `base_query`.
    #[must_use]
    pub fn new(transport: Arc<dyn GraphTransport>, policy: RetryPolicy, base_query: Query) -> Self {
        Self {
            transport,
            policy,
            channels: Arc::new(Channels::new()),
            plan: GraphPlan::new(base_query),
            rate_limit: false,
            progress: None,
        }
    }

    /// Replace the default channels, e.g. to change keep-running policies.
    #[must_use]
    pub fn with_channels(mut self, channels: Channels) -> Self {
        self.channels = Arc::new(channels);
        self
    }

    /// Request `rateLimit` accounting on every graph round trip.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: bool) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The shared channels, for enqueuing work before the run starts.
    #[must_use]
    pub const fn channels(&self) -> &Arc<Channels> {
        &self.channels
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn plan(&self) -> &GraphPlan {
        &self.plan
    }

    /// The graph plan, for selecting fields and registering pagers before the run starts.
    pub const fn plan_mut(&mut self) -> &mut GraphPlan {
        &mut self.plan
    }

    /// Run every worker to completion and return the merged tree.
    ///
    /// On the first failure all channels are cancelled, the remaining workers are
    /// awaited, and that failure is returned.
    pub async fn run(self) -> Result<Value, AggregateError> {
        let Self {
            transport,
            policy,
            channels,
            plan,
            rate_limit,
            progress,
        } = self;

        let tracker = progress.as_ref().map(|p| ChannelTracker::new(p, &channels));

        let mut workers = JoinSet::new();
        let mut worker_kinds = HashMap::new();

        for kind in TASK_CHANNELS {
            let channels = Arc::clone(&channels);
            let handle = workers.spawn(async move {
                let result = match channels.get(kind) {
                    Some(channel) => run_channel(channel).await.map(Value::Object),
                    None => Ok(Value::Null),
                };
                (kind, result)
            });
            let _ = worker_kinds.insert(handle.id(), kind);
        }

        let mut driver = PaginationDriver::new(transport, policy, Arc::clone(&channels), plan, rate_limit);
        let driver_channels = Arc::clone(&channels);
        let handle = workers.spawn(async move {
            let result = driver.run().await;
            // Discovery is over; let the runners drain what is left and stop
            driver_channels.shutdown_keep_running();
            (ChannelKind::Graph, result)
        });
        let _ = worker_kinds.insert(handle.id(), ChannelKind::Graph);

        let mut outputs: Vec<(ChannelKind, Value)> = Vec::with_capacity(4);
        let mut first_error: Option<AggregateError> = None;

        while let Some(joined) = workers.join_next().await {
            let result = match joined {
                Ok((kind, result)) => result.map(|tree| (kind, tree)),
                Err(e) => {
                    let kind = worker_kinds.get(&e.id()).copied().unwrap_or(ChannelKind::Graph);
                    Err(AggregateError::new(kind, Phase::Worker, app_err!("worker stopped abnormally: {e}")))
                }
            };

            match result {
                Ok(output) => outputs.push(output),
                Err(e) if first_error.is_none() => {
                    log::error!(target: LOG_TARGET, "{e}");
                    channels.cancel_all();
                    first_error = Some(e);
                }
                Err(e) => log::debug!(target: LOG_TARGET, "Ignoring later failure: {e}"),
            }
        }

        if let Some(tracker) = &tracker {
            tracker.done();
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        outputs.sort_by_key(|(kind, _)| *kind);
        let merged = outputs
            .into_iter()
            .fold(Value::Object(Map::new()), |acc, (_, output)| tree::merge(acc, output));

        log::info!(
            target: LOG_TARGET,
            "Harvest complete: {} graph round(s), {} rest, {} scrape, {} clone task(s)",
            channels.counts(ChannelKind::Graph).1,
            channels.counts(ChannelKind::Rest).1,
            channels.counts(ChannelKind::Scrape).1,
            channels.counts(ChannelKind::Clone).1
        );

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConnectionPager, Task};
    use crate::graph::Field;
    use crate::policy::CallOutcome;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use core::time::Duration;
    use futures::future::BoxFuture;
    use serde_json::json;
    use tokio::sync::Notify;

    /// Answers every round with "more pages follow", but only once released.
    #[derive(Debug, Default)]
    struct GatedTransport {
        release: Notify,
        calls: AtomicUsize,
    }

    impl GraphTransport for GatedTransport {
        fn execute<'a>(&'a self, _query: &'a Query) -> BoxFuture<'a, CallOutcome<Value>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                self.release.notified().await;
                CallOutcome::Success(json!({"repository": {"issues": {
                    "pageInfo": {"hasNextPage": true, "endCursor": format!("c{call}")},
                    "edges": [{"cursor": format!("c{call}")}]
                }}}))
            })
        }
    }

    fn repo_aggregator(transport: &Arc<GatedTransport>) -> Aggregator {
        let mut base = Query::new();
        let _ = base.select([Field::new("repository").arg("owner", "a").arg("name", "b")]);

        let mut aggregator = Aggregator::new(
            Arc::clone(transport) as Arc<dyn GraphTransport>,
            RetryPolicy::new(tick::Clock::new_tokio()),
            base,
        );
        let pager = ConnectionPager::new(["repository", "issues"], |after| {
            Field::new("issues")
                .arg("first", 1_u32)
                .arg("after", after.map(str::to_string))
                .select(["totalCount"])
        });
        assert!(aggregator.plan_mut().paginate(pager));
        aggregator
    }

    #[tokio::test]
    async fn failing_task_cancels_every_channel() {
        let transport = Arc::new(GatedTransport::default());
        let aggregator = repo_aggregator(&transport);
        let channels = Arc::clone(aggregator.channels());
        assert!(channels.enqueue(
            ChannelKind::Rest,
            Task::new("contributors", || async { Err(app_err!("bad credentials")) })
        ));

        let run = tokio::spawn(aggregator.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !channels.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // The graph round is still in flight, yet every task channel is already closed
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(channels.task_channels().iter().all(|c| c.is_shutdown()));
        assert!(!channels.enqueue(ChannelKind::Scrape, Task::new("dependents", || async { Ok(json!({})) })));

        transport.release.notify_one();
        let err = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap().unwrap_err();

        assert_eq!(err.channel, ChannelKind::Rest);
        assert_eq!(err.phase, Phase::Task { name: "contributors".to_string() });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keep_running_runners_wait_for_the_driver() {
        let transport = Arc::new(GatedTransport::default());
        let aggregator = repo_aggregator(&transport).with_channels(Channels::with_keep_running(true, true, false));
        let channels = Arc::clone(aggregator.channels());
        assert!(channels.enqueue(ChannelKind::Rest, Task::new("profile", || async { Ok(json!({"profile": {}})) })));

        let run = tokio::spawn(aggregator.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while channels.counts(ChannelKind::Rest).1 == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Rest has drained its queue but keeps waiting while the graph round is pending
        assert!(!channels.get(ChannelKind::Rest).unwrap().is_shutdown());
        assert!(channels.enqueue(ChannelKind::Rest, Task::new("late", || async { Err(app_err!("late failure")) })));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !channels.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        transport.release.notify_one();

        let err = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.phase, Phase::Task { name: "late".to_string() });
        assert!(channels.is_cancelled());
        assert!(channels.task_channels().iter().all(|c| c.is_shutdown()));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
