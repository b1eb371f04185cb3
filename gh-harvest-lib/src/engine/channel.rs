use super::Task;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::VecDeque;
use std::sync::Mutex;
use strum::{Display, EnumIter, IntoStaticStr};
use tokio::sync::Notify;

const LOG_TARGET: &str = "    engine";

/// The acquisition modality a channel serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ChannelKind {
    Graph,
    Rest,
    Scrape,
    Clone,
}

#[derive(Debug, Default)]
struct ChannelState {
    queue: VecDeque<Task>,
    shutdown: bool,
}

/// A FIFO queue of tasks with a shutdown signal and a keep-running policy.
///
/// Any worker may enqueue; a single runner consumes through [`Channel::next`].
#[derive(Debug)]
pub struct Channel {
    kind: ChannelKind,
    keep_running: bool,
    state: Mutex<ChannelState>,
    wakeup: Notify,
    issued: AtomicUsize,
    completed: AtomicUsize,
}

impl Channel {
    #[must_use]
    pub fn new(kind: ChannelKind, keep_running: bool) -> Self {
        Self {
            kind,
            keep_running,
            state: Mutex::new(ChannelState::default()),
            wakeup: Notify::new(),
            issued: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Whether the runner waits for more work when the queue drains.
    #[must_use]
    pub const fn keep_running(&self) -> bool {
        self.keep_running
    }

    /// Append a task. Returns `false` (and drops the task) once the channel is shut down.
    pub fn enqueue(&self, task: Task) -> bool {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.shutdown {
                log::debug!(target: LOG_TARGET, "Dropping task '{}' enqueued on closed {} channel", task.name(), self.kind);
                return false;
            }

            log::trace!(target: LOG_TARGET, "Queued task '{}' on {} channel", task.name(), self.kind);
            state.queue.push_back(task);
        }

        let _ = self.issued.fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_one();
        true
    }

    /// Close the channel. Already queued tasks are still delivered.
    pub fn shutdown(&self) {
        self.state.lock().expect("lock poisoned").shutdown = true;
        self.wakeup.notify_one();
    }

    /// Close the channel and discard every undelivered task. Returns how many were dropped.
    pub fn cancel(&self) -> usize {
        let dropped: Vec<Task> = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.shutdown = true;
            state.queue.drain(..).collect()
        };

        self.wakeup.notify_one();
        dropped.len()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().expect("lock poisoned").shutdown
    }

    /// Wait for the next task.
    ///
    /// Returns `None` once the channel is shut down and empty, or, for channels
    /// that do not keep running, as soon as the queue is empty. In that case the
    /// channel shuts itself down, so later [`Channel::enqueue`] calls are refused.
    pub async fn next(&self) -> Option<Task> {
        loop {
            {
                let mut state = self.state.lock().expect("lock poisoned");
                if let Some(task) = state.queue.pop_front() {
                    return Some(task);
                }

                if !self.keep_running {
                    state.shutdown = true;
                }

                if state.shutdown {
                    return None;
                }
            }

            // notify_one leaves a permit behind, so a wakeup sent between the
            // check above and this wait is not lost.
            self.wakeup.notified().await;
        }
    }

    pub(crate) fn mark_completed(&self) {
        let _ = self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Tasks accepted so far.
    #[must_use]
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::Relaxed)
    }

    /// Tasks that ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

/// The task channels of one engine run, shared by every worker.
///
/// The graph channel has no queue: its work is the pagination driver itself.
/// It only contributes a page counter here so progress can be reported uniformly.
#[derive(Debug)]
pub struct Channels {
    rest: Channel,
    scrape: Channel,
    clone: Channel,
    graph_rounds: AtomicUsize,
    graph_done: AtomicBool,
    cancelled: AtomicBool,
}

impl Channels {
    /// REST and scrape work is discovered by the graph driver, so those runners keep
    /// waiting until the driver finishes. Clone work is known up front.
    #[must_use]
    pub fn new() -> Self {
        Self::with_keep_running(true, true, false)
    }

    #[must_use]
    pub fn with_keep_running(rest: bool, scrape: bool, clone: bool) -> Self {
        Self {
            rest: Channel::new(ChannelKind::Rest, rest),
            scrape: Channel::new(ChannelKind::Scrape, scrape),
            clone: Channel::new(ChannelKind::Clone, clone),
            graph_rounds: AtomicUsize::new(0),
            graph_done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// The task channel for `kind`. The graph channel has none.
    #[must_use]
    pub const fn get(&self, kind: ChannelKind) -> Option<&Channel> {
        match kind {
            ChannelKind::Graph => None,
            ChannelKind::Rest => Some(&self.rest),
            ChannelKind::Scrape => Some(&self.scrape),
            ChannelKind::Clone => Some(&self.clone),
        }
    }

    /// Every task channel, in a fixed order.
    #[must_use]
    pub const fn task_channels(&self) -> [&Channel; 3] {
        [&self.rest, &self.scrape, &self.clone]
    }

    /// Route a task onto the channel for `kind`.
    ///
    /// Graph work cannot be enqueued as a task; such a request is logged and refused.
    pub fn enqueue(&self, kind: ChannelKind, task: Task) -> bool {
        match self.get(kind) {
            Some(channel) => channel.enqueue(task),
            None => {
                log::warn!(target: LOG_TARGET, "Refusing to enqueue task '{}' on the graph channel", task.name());
                false
            }
        }
    }

    /// Shut down the channels that were waiting on graph discovery.
    pub fn shutdown_keep_running(&self) {
        for channel in self.task_channels() {
            if channel.keep_running() {
                channel.shutdown();
            }
        }
    }

    /// Cancel the whole run: discard queued tasks and tell the driver to stop.
    pub fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        for channel in self.task_channels() {
            let dropped = channel.cancel();
            if dropped > 0 {
                log::debug!(target: LOG_TARGET, "Discarded {dropped} queued task(s) on {} channel", channel.kind());
            }
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn record_graph_round(&self) {
        let _ = self.graph_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_graph_done(&self) {
        self.graph_done.store(true, Ordering::Relaxed);
    }

    /// `(issued, completed)` counts for `kind`, for progress reporting.
    ///
    /// For the graph channel, both count round trips; `completed` equals `issued`
    /// once the driver is finished.
    #[must_use]
    pub fn counts(&self, kind: ChannelKind) -> (usize, usize) {
        match self.get(kind) {
            Some(channel) => (channel.issued(), channel.completed()),
            None => {
                let rounds = self.graph_rounds.load(Ordering::Relaxed);
                if self.graph_done.load(Ordering::Relaxed) {
                    (rounds, rounds)
                } else {
                    (rounds + 1, rounds)
                }
            }
        }
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn noop(name: &str) -> Task {
        Task::new(name, || async { Ok(json!({})) })
    }

    #[tokio::test]
    async fn fifo_order() {
        let channel = Channel::new(ChannelKind::Rest, false);
        assert!(channel.enqueue(noop("a")));
        assert!(channel.enqueue(noop("b")));

        assert_eq!(channel.next().await.unwrap().name(), "a");
        assert_eq!(channel.next().await.unwrap().name(), "b");
        assert!(channel.next().await.is_none());
        assert_eq!(channel.issued(), 2);
    }

    #[tokio::test]
    async fn drained_channel_refuses_late_tasks() {
        let channel = Channel::new(ChannelKind::Clone, false);
        assert!(channel.enqueue(noop("stats")));

        assert_eq!(channel.next().await.unwrap().name(), "stats");
        assert!(!channel.is_shutdown());
        assert!(channel.next().await.is_none());
        assert!(channel.is_shutdown());

        assert!(!channel.enqueue(noop("late")));
        assert_eq!(channel.issued(), 1);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_refused() {
        let channel = Channel::new(ChannelKind::Scrape, true);
        assert!(channel.enqueue(noop("before")));
        channel.shutdown();
        assert!(!channel.enqueue(noop("after")));

        assert_eq!(channel.next().await.unwrap().name(), "before");
        assert!(channel.next().await.is_none());
        assert_eq!(channel.issued(), 1);
    }

    #[tokio::test]
    async fn keep_running_waits_for_work() {
        let channel = Arc::new(Channel::new(ChannelKind::Rest, true));

        let consumer = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let mut names = Vec::new();
                while let Some(task) = channel.next().await {
                    names.push(task.name().to_string());
                }
                names
            })
        };

        tokio::task::yield_now().await;
        assert!(channel.enqueue(noop("late")));
        channel.shutdown();

        assert_eq!(consumer.await.unwrap(), vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn cancel_discards_queued_tasks() {
        let channel = Channel::new(ChannelKind::Clone, true);
        assert!(channel.enqueue(noop("a")));
        assert!(channel.enqueue(noop("b")));

        assert_eq!(channel.cancel(), 2);
        assert!(channel.is_shutdown());
        assert!(channel.next().await.is_none());
    }

    #[test]
    fn graph_channel_refuses_tasks() {
        let channels = Channels::new();
        assert!(!channels.enqueue(ChannelKind::Graph, noop("x")));
        assert!(channels.enqueue(ChannelKind::Rest, noop("y")));
        assert_eq!(channels.counts(ChannelKind::Rest), (1, 0));
    }

    #[test]
    fn graph_counts_follow_rounds() {
        let channels = Channels::new();
        channels.record_graph_round();
        channels.record_graph_round();
        assert_eq!(channels.counts(ChannelKind::Graph), (3, 2));
        channels.mark_graph_done();
        assert_eq!(channels.counts(ChannelKind::Graph), (2, 2));
    }

    #[test]
    fn cancel_all_sets_flag_and_closes_everything() {
        let channels = Channels::new();
        assert!(channels.enqueue(ChannelKind::Scrape, noop("x")));
        channels.cancel_all();

        assert!(channels.is_cancelled());
        assert!(channels.task_channels().iter().all(|c| c.is_shutdown()));
        assert!(!channels.enqueue(ChannelKind::Rest, noop("y")));
    }

    #[test]
    fn kind_names() {
        assert_eq!(ChannelKind::Scrape.to_string(), "scrape");
        let name: &'static str = ChannelKind::Graph.into();
        assert_eq!(name, "graph");
    }
}
