//! Background tasks owned by one run of the service.

use std::future::Future;

use tokio::task::JoinSet;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Tracks the tasks spawned for the current run so reload and close can wait
/// for all of them to finish.
#[derive(Default)]
pub struct TaskGroup {
    set: JoinSet<(&'static str, Result<(), BoxError>)>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        tracing::debug!(task = name, "spawning background task");
        self.set.spawn(async move { (name, task.await) });
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Wait for every task. Failures are logged; the last one is returned.
    pub async fn wait(&mut self) -> Option<BoxError> {
        let mut last = None;
        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => tracing::debug!(task = name, "background task finished"),
                Ok((name, Err(e))) => {
                    tracing::error!(task = name, error = %e, "background task failed");
                    last = Some(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "background task panicked or was cancelled");
                    last = Some(Box::new(e) as BoxError);
                }
            }
        }
        last
    }
}
