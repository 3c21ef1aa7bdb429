//! Join-or-cancel task group.
//!
//! Every process and pump of a pipeline runs as a task in one [`TaskGroup`].
//! The first task to fail cancels the group's token, which kills every
//! sibling process; [`TaskGroup::join`] then waits for all of them and
//! returns a single aggregated error.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::process::SupervisedChild;
use crate::{Error, Result};

pub struct TaskGroup {
    tasks: JoinSet<Result<()>>,
    cancel: CancellationToken,
}

impl TaskGroup {
    /// New group whose token is a child of `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
        }
    }

    /// Token cancelled when any task fails or the parent is cancelled.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Supervise `child` until it exits or the group is cancelled.
    ///
    /// With `channel` set, a failure is reported as that channel's
    /// [`Error::WorkerFailure`].
    pub fn spawn_child(&mut self, child: SupervisedChild, channel: Option<usize>) {
        let cancel = self.cancel.clone();
        let stage = child.stage();
        self.tasks.spawn(async move {
            child.wait(&cancel).await.map_err(|e| match channel {
                Some(channel) if !e.is_cancelled() => Error::WorkerFailure {
                    channel,
                    stage,
                    source: Box::new(e),
                },
                _ => e,
            })
        });
    }

    /// Wait for every task.
    ///
    /// The first failure cancels the rest. Returns `Ok(())` only when every
    /// task succeeded.
    pub async fn join(mut self) -> Result<()> {
        let mut errors = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(Error::Cancelled),
                Err(e) => Err(Error::Other(format!("pipeline task panicked: {e}"))),
            };
            if let Err(e) = result {
                if !e.is_cancelled() && !self.cancel.is_cancelled() {
                    warn!(error = %e, "Pipeline task failed, cancelling siblings");
                }
                self.cancel.cancel();
                errors.push(e);
            }
        }

        match Error::aggregate(errors) {
            None => Ok(()),
            Some(e) => {
                debug!(error = %e, "Task group finished with failure");
                Err(e)
            }
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        // Dropped without join: make sure nothing is left running.
        self.cancel.cancel();
    }
}
