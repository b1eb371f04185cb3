use super::{ChannelKind, Channels, Task};
use crate::graph::{Field, Query};
use crate::tree::TreePath;
use chrono::{DateTime, Utc};
use core::fmt::{Debug, Formatter};
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = "    engine";

/// A continuation produced by a [`PaginationRule`], applied to the next round.
pub type Action = Box<dyn FnOnce(&mut NextRound<'_>) + Send>;

/// What a rule wants after seeing the latest merged tree.
pub enum RuleOutcome {
    /// No further pages for this connection.
    Finished,
    Continue(Action),
    ContinueAll(Vec<Action>),
}

impl RuleOutcome {
    #[must_use]
    pub fn into_actions(self) -> Vec<Action> {
        match self {
            Self::Finished => Vec::new(),
            Self::Continue(action) => vec![action],
            Self::ContinueAll(actions) => actions,
        }
    }
}

impl Debug for RuleOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Finished => write!(f, "Finished"),
            Self::Continue(_) => write!(f, "Continue(..)"),
            Self::ContinueAll(actions) => write!(f, "ContinueAll({} actions)", actions.len()),
        }
    }
}

/// Decides, once per round, whether its connection needs another page.
///
/// A rule is consumed by evaluation. To keep paginating it must re-register
/// itself from one of the actions it returns.
pub trait PaginationRule: Send {
    fn evaluate(self: Box<Self>, tree: &Value) -> RuleOutcome;
}

impl<F> PaginationRule for F
where
    F: FnOnce(&Value) -> RuleOutcome + Send,
{
    fn evaluate(self: Box<Self>, tree: &Value) -> RuleOutcome {
        (*self)(tree)
    }
}

/// The mutable context actions operate on: the next query, the rule registry,
/// and the task channels.
pub struct NextRound<'a> {
    query: &'a mut Query,
    rules: &'a mut Vec<Box<dyn PaginationRule>>,
    channels: &'a Arc<Channels>,
}

impl<'a> NextRound<'a> {
    pub(crate) const fn new(
        query: &'a mut Query,
        rules: &'a mut Vec<Box<dyn PaginationRule>>,
        channels: &'a Arc<Channels>,
    ) -> Self {
        Self { query, rules, channels }
    }

    pub fn query(&mut self) -> &mut Query {
        self.query
    }

    pub fn register(&mut self, rule: impl PaginationRule + 'static) {
        self.rules.push(Box::new(rule));
    }

    pub fn enqueue(&self, kind: ChannelKind, task: Task) -> bool {
        self.channels.enqueue(kind, task)
    }

    /// The shared channels, for tasks that discover further work themselves.
    #[must_use]
    pub const fn channels(&self) -> &Arc<Channels> {
        self.channels
    }
}

/// Builds the connection field for one page, given the cursor to resume after.
pub type PageRequest = Arc<dyn Fn(Option<&str>) -> Field + Send + Sync>;

/// Receives the items of each newly merged page.
pub type DiscoveryHook = Arc<dyn Fn(&[Value], &mut NextRound<'_>) + Send + Sync>;

/// Whether a connection lists its items under `edges` or `nodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemsKey {
    Edges,
    Nodes,
}

impl ItemsKey {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Edges => "edges",
            Self::Nodes => "nodes",
        }
    }
}

#[derive(Debug, Clone)]
struct SinceCutoff {
    cutoff: DateTime<Utc>,
    field: TreePath,
}

/// The reusable rule for one cursor-paginated connection.
///
/// `path` holds the response keys leading to the connection, e.g.
/// `["repository", "pullRequests"]`. The same keys locate the parent field in the
/// query when the next page is requested.
#[derive(Clone)]
pub struct ConnectionPager {
    path: Vec<String>,
    items_key: ItemsKey,
    seen: usize,
    since: Option<SinceCutoff>,
    discover: Option<DiscoveryHook>,
    request: PageRequest,
}

impl Debug for ConnectionPager {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionPager")
            .field("path", &self.path)
            .field("items_key", &self.items_key)
            .field("seen", &self.seen)
            .field("since", &self.since)
            .finish_non_exhaustive()
    }
}

impl ConnectionPager {
    pub fn new<I, S, F>(path: I, request: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Option<&str>) -> Field + Send + Sync + 'static,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            items_key: ItemsKey::Edges,
            seen: 0,
            since: None,
            discover: None,
            request: Arc::new(request),
        }
    }

    #[must_use]
    pub const fn items(mut self, items_key: ItemsKey) -> Self {
        self.items_key = items_key;
        self
    }

    /// Stop once the last item of a new page is older than `cutoff`.
    ///
    /// `field` locates the RFC 3339 timestamp inside an item, e.g.
    /// `node.mergedAt` for edges. Items without a parsable timestamp never stop
    /// pagination.
    #[must_use]
    pub fn since(mut self, cutoff: DateTime<Utc>, field: TreePath) -> Self {
        self.since = Some(SinceCutoff { cutoff, field });
        self
    }

    #[must_use]
    pub fn discover<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[Value], &mut NextRound<'_>) + Send + Sync + 'static,
    {
        self.discover = Some(Arc::new(hook));
        self
    }

    /// The connection field for the first page.
    #[must_use]
    pub fn first_page(&self) -> Field {
        (self.request)(None)
    }

    /// Add the first page to `query` beneath the connection's parent.
    pub fn select_first_page(&self, query: &mut Query) -> bool {
        self.select_page(query, None)
    }

    fn select_page(&self, query: &mut Query, cursor: Option<&str>) -> bool {
        let parent: Vec<&str> = self.path[..self.path.len().saturating_sub(1)]
            .iter()
            .map(String::as_str)
            .collect();

        let selected = query.select_at(&parent, (self.request)(cursor));
        if !selected {
            log::warn!(target: LOG_TARGET, "Cannot request next page of {}: parent is not part of the query", self.path_display());
        }
        selected
    }

    fn path_display(&self) -> String {
        TreePath::keys(self.path.iter().cloned()).to_string()
    }

    fn is_past_cutoff(&self, item: &Value) -> bool {
        let Some(since) = &self.since else {
            return false;
        };

        since
            .field
            .lookup(item)
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .is_some_and(|ts| ts.with_timezone(&Utc) < since.cutoff)
    }

    fn decide(&self, connection: &Value, held: usize) -> Option<String> {
        let page_info = connection.get("pageInfo");

        let has_next = match page_info.and_then(|p| p.get("hasNextPage")).and_then(Value::as_bool) {
            Some(has_next) => has_next,
            None => connection
                .get("totalCount")
                .and_then(Value::as_u64)
                .is_some_and(|total| total > held as u64),
        };

        if !has_next {
            return None;
        }

        let cursor = page_info
            .and_then(|p| p.get("endCursor"))
            .and_then(Value::as_str)
            .or_else(|| {
                connection
                    .get(self.items_key.as_str())
                    .and_then(Value::as_array)
                    .and_then(|items| items.last())
                    .and_then(|edge| edge.get("cursor"))
                    .and_then(Value::as_str)
            });

        if cursor.is_none() {
            log::debug!(target: LOG_TARGET, "{} reports more pages but no cursor", self.path_display());
        }

        cursor.map(str::to_string)
    }
}

impl PaginationRule for ConnectionPager {
    fn evaluate(self: Box<Self>, tree: &Value) -> RuleOutcome {
        let connection = TreePath::keys(self.path.iter().cloned()).lookup(tree);
        let items = connection
            .and_then(|c| c.get(self.items_key.as_str()))
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice);

        let new_items = items.get(self.seen..).unwrap_or_default();
        if new_items.is_empty() {
            log::debug!(target: LOG_TARGET, "{} returned no new items, done", self.path_display());
            return RuleOutcome::Finished;
        }

        let mut actions: Vec<Action> = Vec::new();

        if let Some(hook) = &self.discover {
            let hook = Arc::clone(hook);
            let page = new_items.to_vec();
            actions.push(Box::new(move |next: &mut NextRound<'_>| hook(&page, next)));
        }

        let past_cutoff = new_items.last().is_some_and(|item| self.is_past_cutoff(item));
        let cursor = if past_cutoff {
            log::debug!(target: LOG_TARGET, "{} reached the since cutoff, done", self.path_display());
            None
        } else {
            connection.and_then(|c| self.decide(c, items.len()))
        };

        if let Some(cursor) = cursor {
            let held = items.len();
            log::trace!(target: LOG_TARGET, "{} continues after {held} item(s)", self.path_display());

            let mut pager = *self;
            pager.seen = held;
            actions.push(Box::new(move |next: &mut NextRound<'_>| {
                if pager.select_page(next.query(), Some(&cursor)) {
                    next.register(pager);
                }
            }));
        }

        if actions.is_empty() {
            RuleOutcome::Finished
        } else {
            RuleOutcome::ContinueAll(actions)
        }
    }
}
