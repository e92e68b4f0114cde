//! Handle to a spawned fetcher or writer task
//!
//! Each worker instance owns a fresh [`CancellationToken`]. Stopping a worker
//! cancels the token, then waits for the task with a deadline; a task that is
//! still running afterwards is aborted. Handles are consumed by `stop`, so a
//! stopped worker can never be reused.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::state::{StopOutcome, WorkerKind};
use crate::error::{CollectorError, CollectorResult};

#[derive(Debug)]
pub struct WorkerHandle {
    kind: WorkerKind,
    collector_id: String,
    cancel: CancellationToken,
    task: JoinHandle<CollectorResult<()>>,
}

impl WorkerHandle {
    /// Spawn `worker` on the runtime
    ///
    /// `cancel` must be the token the worker observes.
    pub fn spawn<F>(
        kind: WorkerKind,
        collector_id: &str,
        cancel: CancellationToken,
        worker: F,
    ) -> Self
    where
        F: Future<Output = CollectorResult<()>> + Send + 'static,
    {
        debug!(collector = collector_id, "spawning {kind}");

        Self {
            kind,
            collector_id: collector_id.to_string(),
            cancel,
            task: tokio::spawn(worker),
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Whether the task has returned on its own (or was aborted)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the worker and join it within `timeout`, aborting it otherwise
    pub async fn stop(mut self, timeout: Duration) -> StopOutcome {
        let kind = self.kind;
        let collector = self.collector_id.as_str();

        self.cancel.cancel();

        match time::timeout(timeout, &mut self.task).await {
            Ok(joined) => match flatten(joined) {
                Ok(()) => {
                    debug!(collector, "{kind} stopped");
                    StopOutcome::Graceful
                }
                Err(e) => {
                    error!(collector, "{kind} ended with error: {e}");
                    StopOutcome::Failed(e)
                }
            },
            Err(_) => {
                warn!(
                    collector,
                    "{kind} did not stop within {timeout:?}, terminating it forcibly"
                );
                self.task.abort();
                StopOutcome::Forced
            }
        }
    }

    /// Collect the result of a worker that already returned
    ///
    /// Returns the handle unchanged if the task is still running.
    pub async fn reap(self) -> Result<CollectorResult<()>, Self> {
        if !self.task.is_finished() {
            return Err(self);
        }

        Ok(flatten(self.task.await))
    }
}

fn flatten(joined: Result<CollectorResult<()>, tokio::task::JoinError>) -> CollectorResult<()> {
    joined.map_err(CollectorError::from)?
}
