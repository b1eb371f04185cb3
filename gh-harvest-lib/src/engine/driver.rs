use super::{AggregateError, ChannelKind, Channels, ConnectionPager, NextRound, PaginationRule, Phase};
use crate::graph::{GraphTransport, Query, Selection, rate_limit_field};
use crate::policy::{RetryPolicy, merge_page};
use ohno::app_err;
use serde_json::Value;
use std::sync::Arc;
use strum::Display;

const LOG_TARGET: &str = "     graph";

/// Lifecycle of the pagination loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DriverState {
    Idle,
    AwaitingPage,
    Deciding,
    Done,
}

/// The graph work of one run: the first query, the base query later rounds
/// start from, and the rules registered before the first request.
#[derive(Default)]
pub struct GraphPlan {
    base_query: Query,
    query: Query,
    rules: Vec<Box<dyn PaginationRule>>,
}

impl core::fmt::Debug for GraphPlan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GraphPlan")
            .field("base_query", &self.base_query)
            .field("query", &self.query)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl GraphPlan {
    /// Start a plan whose first query and every later round begin from `base_query`.
    #[must_use]
    pub fn new(base_query: Query) -> Self {
        Self {
            query: base_query.clone(),
            base_query,
            rules: Vec::new(),
        }
    }

    /// Add `selection` to the first query beneath `path`.
    pub fn select_at(&mut self, path: &[&str], selection: impl Into<Selection>) -> bool {
        self.query.select_at(path, selection)
    }

    /// Request the first page of a connection and register its pager.
    pub fn paginate(&mut self, pager: ConnectionPager) -> bool {
        if !pager.select_first_page(&mut self.query) {
            return false;
        }
        self.rules.push(Box::new(pager));
        true
    }

    pub fn register(&mut self, rule: impl PaginationRule + 'static) {
        self.rules.push(Box::new(rule));
    }

    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Runs the graph round-trip loop until no rule asks for another page.
pub struct PaginationDriver {
    transport: Arc<dyn GraphTransport>,
    policy: RetryPolicy,
    channels: Arc<Channels>,
    base_query: Query,
    query: Query,
    rules: Vec<Box<dyn PaginationRule>>,
    rate_limit: bool,
    state: DriverState,
    rounds: usize,
}

impl core::fmt::Debug for PaginationDriver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PaginationDriver")
            .field("state", &self.state)
            .field("rounds", &self.rounds)
            .field("rules", &self.rules.len())
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

impl PaginationDriver {
    #[must_use]
    pub fn new(
        transport: Arc<dyn GraphTransport>,
        policy: RetryPolicy,
        channels: Arc<Channels>,
        plan: GraphPlan,
        rate_limit: bool,
    ) -> Self {
        Self {
            transport,
            policy,
            channels,
            base_query: plan.base_query,
            query: plan.query,
            rules: plan.rules,
            rate_limit,
            state: DriverState::Idle,
            rounds: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> DriverState {
        self.state
    }

    /// Round trips completed so far.
    #[must_use]
    pub const fn rounds(&self) -> usize {
        self.rounds
    }

    /// Drive pagination to completion and return the merged graph tree.
    pub async fn run(&mut self) -> Result<Value, AggregateError> {
        let mut acc = Value::Null;

        loop {
            let round = self.rounds + 1;
            let fail = |error| AggregateError::new(ChannelKind::Graph, Phase::Pagination { round }, error);

            if self.channels.is_cancelled() {
                return Err(fail(app_err!("run cancelled before graph round {round}")));
            }

            if self.query.is_empty() {
                log::debug!(target: LOG_TARGET, "Nothing left to query after {} round(s)", self.rounds);
                break;
            }

            self.state = DriverState::AwaitingPage;
            let mut query = core::mem::take(&mut self.query);
            query.prune();
            if self.rate_limit {
                let _ = query.select([rate_limit_field()]);
            }

            log::info!(target: LOG_TARGET, "Querying page {round}");
            log::trace!(target: LOG_TARGET, "{query}");

            let transport = Arc::clone(&self.transport);
            let query = Arc::new(query);
            let page = self
                .policy
                .call(&format!("graph round {round}"), move || {
                    let transport = Arc::clone(&transport);
                    let query = Arc::clone(&query);
                    async move { transport.execute(&query).await }
                })
                .await
                .map_err(fail)?;

            self.rounds = round;
            self.channels.record_graph_round();
            merge_page(&mut acc, page);

            self.state = DriverState::Deciding;
            let actions: Vec<_> = core::mem::take(&mut self.rules)
                .into_iter()
                .flat_map(|rule| rule.evaluate(&acc).into_actions())
                .collect();

            if actions.is_empty() {
                log::debug!(target: LOG_TARGET, "No further pages after {round} round(s)");
                break;
            }

            let mut next = self.base_query.clone();
            {
                let mut next_round = NextRound::new(&mut next, &mut self.rules, &self.channels);
                for action in actions {
                    action(&mut next_round);
                }
            }
            self.query = next;
        }

        self.state = DriverState::Done;
        self.channels.mark_graph_done();
        Ok(acc)
    }
}
