use super::{AggregateError, Channel, Phase};
use crate::tree;
use ohno::app_err;
use serde_json::{Map, Value};

const LOG_TARGET: &str = "    engine";

/// Drain `channel` sequentially, unioning every task result into one accumulator.
///
/// Stops when [`Channel::next`] reports the channel closed. The first failing
/// task aborts the runner.
pub async fn run_channel(channel: &Channel) -> Result<Map<String, Value>, AggregateError> {
    let kind = channel.kind();
    let mut acc = Map::new();

    while let Some(task) = channel.next().await {
        let name = task.name().to_string();
        log::debug!(target: LOG_TARGET, "Running {kind} task '{name}'");

        let fail = |error| AggregateError::new(kind, Phase::Task { name: name.clone() }, error);

        let fragment = match task.execute().await.map_err(fail)? {
            Value::Object(fragment) => fragment,
            Value::Null => Map::new(),
            other => return Err(fail(app_err!("task produced a non-map result: {other}"))),
        };

        for key in tree::union_top_level(&mut acc, fragment) {
            log::debug!(target: LOG_TARGET, "{kind} task '{name}' replaced earlier key '{key}'");
        }

        channel.mark_completed();
    }

    log::debug!(target: LOG_TARGET, "{kind} runner finished after {} task(s)", channel.completed());
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ChannelKind, Channels, Task};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn unions_results_in_order() {
        let channel = Channel::new(ChannelKind::Rest, false);
        let _ = channel.enqueue(Task::new("a", || async { Ok(json!({"a": 1, "shared": "first"})) }));
        let _ = channel.enqueue(Task::new("b", || async { Ok(json!({"b": 2, "shared": "second"})) }));

        let acc = run_channel(&channel).await.unwrap();
        assert_eq!(Value::Object(acc), json!({"a": 1, "b": 2, "shared": "second"}));
        assert_eq!(channel.completed(), 2);
    }

    #[tokio::test]
    async fn shutdown_runs_exactly_the_queued_tasks() {
        let channels = Arc::new(Channels::new());
        let executed = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let channels_for_task = Arc::clone(&channels);
            let executed = Arc::clone(&executed);
            let _ = channels.enqueue(
                ChannelKind::Rest,
                Task::new(format!("task-{i}"), move || async move {
                    let _ = executed.fetch_add(1, Ordering::SeqCst);
                    let accepted = channels_for_task.enqueue(ChannelKind::Rest, Task::new("spawned", || async { Ok(json!({})) }));
                    Ok(json!({ "accepted": accepted }))
                }),
            );
        }

        let rest = channels.get(ChannelKind::Rest).unwrap();
        rest.shutdown();

        let acc = run_channel(rest).await.unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 5);
        assert_eq!(acc["accepted"], json!(false));
        assert_eq!(rest.completed(), 5);
    }

    #[tokio::test]
    async fn failing_task_aborts_runner() {
        let channel = Channel::new(ChannelKind::Scrape, false);
        let _ = channel.enqueue(Task::new("dependents", || async { Err(app_err!("no anchor")) }));
        let _ = channel.enqueue(Task::new("never", || async { Ok(json!({"never": true})) }));

        let err = run_channel(&channel).await.unwrap_err();
        assert_eq!(err.channel, ChannelKind::Scrape);
        assert_eq!(
            err.phase,
            Phase::Task {
                name: "dependents".to_string()
            }
        );
    }

    #[tokio::test]
    async fn finished_runner_leaves_counts_balanced() {
        let channel = Channel::new(ChannelKind::Clone, false);
        let _ = channel.enqueue(Task::new("commits", || async { Ok(json!({"commits": 3})) }));

        let _ = run_channel(&channel).await.unwrap();
        assert!(!channel.enqueue(Task::new("late", || async { Ok(json!({"late": true})) })));
        assert_eq!((channel.issued(), channel.completed()), (1, 1));
    }

    #[tokio::test]
    async fn non_map_result_is_an_error() {
        let channel = Channel::new(ChannelKind::Clone, false);
        let _ = channel.enqueue(Task::new("bad", || async { Ok(json!([1, 2])) }));
        assert!(run_channel(&channel).await.is_err());
    }
}
