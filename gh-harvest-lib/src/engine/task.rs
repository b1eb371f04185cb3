use crate::Result;
use core::fmt::{Debug, Formatter};
use futures::future::BoxFuture;
use serde_json::Value;

type TaskFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value>> + Send>;

/// A named, one-shot unit of work producing a partial result tree.
///
/// Ownership moves into a [`super::Channel`] on enqueue and the task is consumed
/// exactly once by that channel's runner.
pub struct Task {
    name: String,
    run: TaskFn,
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move || Box::pin(run())),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consume the task and run it.
    pub async fn execute(self) -> Result<Value> {
        (self.run)().await
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish_non_exhaustive()
    }
}
