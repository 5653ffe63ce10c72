//! Live progress streams for asynchronous tasks.
//!
//! A [`ProgressStream`] yields `connected`, then every update from the task's
//! channel, with a `heartbeat` whenever nothing arrives within the heartbeat
//! interval, and ends after exactly one terminal event.

use std::time::Duration;

use futures_util::Stream;
use tracing::{debug, warn};

use deepresearch_shared::{ProgressUpdate, ResearchOutcome, Result, TaskId};

use crate::tasks::{ProgressReceiver, TaskRegistry};

/// Opens progress streams against a shared [`TaskRegistry`].
#[derive(Clone)]
pub struct ProgressStreamer {
    registry: TaskRegistry,
    heartbeat: Duration,
}

impl ProgressStreamer {
    pub fn new(registry: TaskRegistry, heartbeat: Duration) -> Self {
        Self {
            registry,
            heartbeat,
        }
    }

    /// Subscribe to a task. Fails with `TaskNotFound` or `TaskBusy`.
    pub fn stream(&self, task_id: &TaskId) -> Result<ProgressStream> {
        let question = self.registry.question(task_id).unwrap_or_default();
        let receiver = self.registry.get_channel(task_id)?;
        debug!(%task_id, "progress consumer attached");
        Ok(ProgressStream {
            task_id: *task_id,
            question,
            registry: self.registry.clone(),
            receiver,
            heartbeat: self.heartbeat,
            last_progress: 0,
            phase: Phase::Connecting,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Live,
    Finished,
}

/// Consumer side of one task's progress.
///
/// Dropping the stream before its terminal event deregisters the task.
pub struct ProgressStream {
    task_id: TaskId,
    question: String,
    registry: TaskRegistry,
    receiver: ProgressReceiver,
    heartbeat: Duration,
    last_progress: u8,
    phase: Phase,
}

impl ProgressStream {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Next event, or `None` once the terminal event has been yielded.
    pub async fn next(&mut self) -> Option<ProgressUpdate> {
        match self.phase {
            Phase::Connecting => {
                self.phase = Phase::Live;
                return Some(ProgressUpdate::connected());
            }
            Phase::Finished => return None,
            Phase::Live => {}
        }

        let update = match tokio::time::timeout(self.heartbeat, self.receiver.recv()).await {
            Ok(Some(update)) => update,
            Ok(None) => {
                warn!(task_id = %self.task_id, "producer closed without a terminal event");
                let outcome =
                    ResearchOutcome::crashed(&self.question, "research task ended unexpectedly");
                ProgressUpdate::error(
                    "Research task ended unexpectedly",
                    self.last_progress,
                    outcome,
                )
            }
            Err(_) => ProgressUpdate::heartbeat(self.last_progress),
        };

        self.last_progress = self.last_progress.max(update.progress);
        if update.is_terminal() {
            self.phase = Phase::Finished;
            self.registry.remove_task(&self.task_id);
        }
        Some(update)
    }

    /// Adapt into a [`Stream`] of updates.
    pub fn into_stream(self) -> impl Stream<Item = ProgressUpdate> + Send + 'static {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|update| (update, stream))
        })
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        if self.phase != Phase::Finished && self.registry.remove_task(&self.task_id) {
            debug!(task_id = %self.task_id, "progress consumer disconnected");
        }
    }
}
