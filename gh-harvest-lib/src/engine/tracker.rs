//! Per-channel progress reporting.

use super::{ChannelKind, Channels};
use crate::progress::Progress;
use owo_colors::OwoColorize;
use std::sync::Arc;
use strum::IntoEnumIterator;

/// Feeds per-channel task counts to a [`Progress`] sink.
#[derive(Clone)]
pub struct ChannelTracker {
    progress: Arc<dyn Progress>,
}

impl core::fmt::Debug for ChannelTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelTracker").field("progress", &"<dyn Progress>").finish()
    }
}

impl ChannelTracker {
    /// Install a determinate callback on `progress` that reads `channels`.
    #[must_use]
    pub fn new(progress: &Arc<dyn Progress>, channels: &Arc<Channels>) -> Self {
        let channels = Arc::clone(channels);
        let use_colors = progress.use_colors();
        progress.set_phase("Harvesting");
        progress.set_determinate(Box::new(move || Self::progress_reporter_callback(&channels, use_colors)));

        Self {
            progress: Arc::clone(progress),
        }
    }

    pub fn done(&self) {
        self.progress.done();
    }

    /// Compute `(total, completed, message)` from the channel counters.
    fn progress_reporter_callback(channels: &Channels, use_colors: bool) -> (u64, u64, String) {
        let mut total_issued = 0u64;
        let mut total_completed = 0u64;
        let mut parts = Vec::new();

        for kind in ChannelKind::iter() {
            let (issued, completed) = channels.counts(kind);
            if issued == 0 {
                continue;
            }

            total_issued += issued as u64;
            total_completed += completed as u64;

            let text = format!("{completed}/{issued} {kind}");
            let finished = completed >= issued && channels.get(kind).is_none_or(|c| c.is_shutdown() || !c.keep_running());
            parts.push(if use_colors && finished {
                format!("{}", text.green())
            } else {
                text
            });
        }

        let message = if parts.is_empty() {
            "No requests".to_string()
        } else {
            parts.join(", ")
        };

        (total_issued, total_completed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Task;
    use serde_json::json;

    #[test]
    fn message_lists_active_channels() {
        let channels = Channels::new();
        channels.record_graph_round();
        let _ = channels.enqueue(ChannelKind::Rest, Task::new("a", || async { Ok(json!({})) }));
        let _ = channels.enqueue(ChannelKind::Rest, Task::new("b", || async { Ok(json!({})) }));

        let (total, done, message) = ChannelTracker::progress_reporter_callback(&channels, false);
        assert_eq!(total, 4);
        assert_eq!(done, 1);
        assert_eq!(message, "1/2 graph, 0/2 rest");
    }

    #[test]
    fn nothing_issued() {
        let channels = Channels::new();
        channels.mark_graph_done();
        let (total, _, message) = ChannelTracker::progress_reporter_callback(&channels, false);
        assert_eq!(total, 0);
        assert_eq!(message, "No requests");
    }
}
