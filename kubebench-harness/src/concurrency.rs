//! Fail-fast groups of concurrent tasks.
//!
//! [`TaskGroup`] is the counting barrier used by the drivers: every unit of work (one object to
//! create, one watcher to drain) becomes a task, and [`TaskGroup::join_all`] resolves once all of
//! them have finished. The first failure aborts all remaining tasks and is returned to the caller.

use std::future::Future;

use tokio::task::{JoinError, JoinSet};

use crate::error::{Error, Result};

/// A set of spawned tasks that succeed together or fail on the first error.
///
/// Dropping the group aborts all tasks that are still running.
#[derive(Debug)]
pub struct TaskGroup<T> {
    tasks: JoinSet<Result<T>>,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    /// Spawns a task onto the current runtime as part of this group.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Returns the number of tasks that have not been joined yet.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if there are no tasks left in the group.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for all tasks and returns their outputs in completion order.
    ///
    /// On the first error or panic, all other tasks are aborted and the error is returned.
    pub async fn join_all(mut self) -> Result<Vec<T>> {
        let mut outputs = Vec::with_capacity(self.tasks.len());

        while let Some(joined) = self.tasks.join_next().await {
            match joined.map_err(task_error).and_then(|result| result) {
                Ok(output) => outputs.push(output),
                Err(error) => {
                    let cancelled = self.tasks.len();
                    self.tasks.abort_all();
                    tracing::debug!(cancelled, "aborting task group after failure");
                    return Err(error);
                }
            }
        }

        Ok(outputs)
    }
}

impl<T: Send + 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn task_error(error: JoinError) -> Error {
    match error.try_into_panic() {
        Ok(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            Error::TaskPanicked(message)
        }
        Err(error) => Error::TaskPanicked(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn joins_all_outputs() {
        let mut group = TaskGroup::new();
        for i in 0..10 {
            group.spawn(async move { Ok(i) });
        }
        assert_eq!(group.len(), 10);

        let mut outputs = group.join_all().await.unwrap();
        outputs.sort_unstable();
        assert_eq!(outputs, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_group_succeeds() {
        let group = TaskGroup::<()>::new();
        assert!(group.is_empty());
        assert!(group.join_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_error_cancels_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new();

        for _ in 0..5 {
            let finished = Arc::clone(&finished);
            group.spawn(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        group.spawn(async {
            Err(Error::WatchClosed {
                seen: 0,
                expected: 1,
            })
        });

        let err = group.join_all().await.unwrap_err();
        assert!(matches!(err, Error::WatchClosed { .. }));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let mut group = TaskGroup::<()>::new();
        group.spawn(async {
            let missing: Option<()> = None;
            missing.expect("boom");
            Ok(())
        });

        let err = group.join_all().await.unwrap_err();
        assert!(matches!(err, Error::TaskPanicked(message) if message == "boom"));
    }
}
