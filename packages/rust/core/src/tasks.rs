//! Registry of in-flight asynchronous research tasks.
//!
//! Each task owns an unbounded progress channel. The producer (the worker
//! running the pipeline) keeps the sender; the receiver stays parked in the
//! registry until a single consumer takes it with [`TaskRegistry::get_channel`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

use deepresearch_shared::{DeepResearchError, ProgressUpdate, Result, TaskId};

/// Producer end of a task's progress channel.
pub type ProgressSender = UnboundedSender<ProgressUpdate>;

/// Consumer end of a task's progress channel.
pub type ProgressReceiver = UnboundedReceiver<ProgressUpdate>;

struct TaskEntry {
    question: String,
    receiver: Option<ProgressReceiver>,
    handle: Option<JoinHandle<()>>,
    terminal: bool,
    created_at: Instant,
    finished_at: Option<Instant>,
}

/// Keyed set of live tasks, shared between the runner and the streamer.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashMap<TaskId, TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
        // Entries stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new task and return its id and the producer end of its channel.
    pub fn create_task(&self, question: &str) -> (TaskId, ProgressSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = TaskId::new();
        self.lock().insert(
            id,
            TaskEntry {
                question: question.to_string(),
                receiver: Some(rx),
                handle: None,
                terminal: false,
                created_at: Instant::now(),
                finished_at: None,
            },
        );
        debug!(task_id = %id, "task registered");
        (id, tx)
    }

    /// Store the background handle of a task. Ignored if the task is gone.
    pub fn attach_handle(&self, id: &TaskId, handle: JoinHandle<()>) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.handle = Some(handle);
        }
    }

    /// Take the consumer end of a task's channel.
    ///
    /// Returns [`DeepResearchError::TaskNotFound`] for unknown ids and
    /// [`DeepResearchError::TaskBusy`] if another consumer already holds it.
    pub fn get_channel(&self, id: &TaskId) -> Result<ProgressReceiver> {
        let mut tasks = self.lock();
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| DeepResearchError::TaskNotFound(id.to_string()))?;
        entry
            .receiver
            .take()
            .ok_or_else(|| DeepResearchError::TaskBusy(id.to_string()))
    }

    /// Note that the producer emitted its terminal event.
    pub fn mark_terminal(&self, id: &TaskId) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.terminal = true;
            entry.finished_at = Some(Instant::now());
        }
    }

    /// Deregister a task. Returns whether it was present.
    pub fn remove_task(&self, id: &TaskId) -> bool {
        let removed = self.lock().remove(id);
        if let Some(entry) = &removed {
            debug!(
                task_id = %id,
                question = %entry.question,
                age_ms = entry.created_at.elapsed().as_millis() as u64,
                "task removed"
            );
        }
        removed.is_some()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Question the task was created for.
    pub fn question(&self, id: &TaskId) -> Option<String> {
        self.lock().get(id).map(|e| e.question.clone())
    }

    /// Whether the producer of a task has emitted its terminal event.
    pub fn is_terminal(&self, id: &TaskId) -> bool {
        self.lock().get(id).is_some_and(|e| e.terminal)
    }

    /// Drop terminal tasks whose result nobody consumed within `retention`.
    /// Returns the number of tasks removed.
    pub fn sweep(&self, retention: Duration) -> usize {
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|_, entry| match entry.finished_at {
            Some(at) if entry.terminal && entry.receiver.is_some() => at.elapsed() < retention,
            _ => true,
        });
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(removed, "swept unconsumed tasks");
        }
        removed
    }

    /// Abort every running task. Used on shutdown.
    pub fn abort_all(&self) {
        for entry in self.lock().values_mut() {
            if let Some(handle) = entry.handle.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let registry = TaskRegistry::new();
        let (a, _) = registry.create_task("q");
        let (b, _) = registry.create_task("q");
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn channel_has_a_single_consumer() {
        let registry = TaskRegistry::new();
        let (id, tx) = registry.create_task("q");

        let mut rx = registry.get_channel(&id).unwrap();
        assert!(matches!(
            registry.get_channel(&id),
            Err(DeepResearchError::TaskBusy(_))
        ));

        tx.send(ProgressUpdate::heartbeat(3)).unwrap();
        assert_eq!(rx.try_recv().unwrap().progress, 3);
    }

    #[test]
    fn unknown_and_removed_tasks_are_not_found() {
        let registry = TaskRegistry::new();
        assert!(matches!(
            registry.get_channel(&TaskId::new()),
            Err(DeepResearchError::TaskNotFound(_))
        ));

        let (id, _tx) = registry.create_task("q");
        assert!(registry.remove_task(&id));
        assert!(!registry.remove_task(&id));
        assert!(matches!(
            registry.get_channel(&id),
            Err(DeepResearchError::TaskNotFound(_))
        ));
    }

    #[test]
    fn producer_never_blocks_without_consumer() {
        let registry = TaskRegistry::new();
        let (_id, tx) = registry.create_task("q");
        for i in 0..10_000 {
            tx.send(ProgressUpdate::heartbeat((i % 100) as u8)).unwrap();
        }
    }

    #[test]
    fn sweep_removes_only_terminal_unconsumed_tasks() {
        let registry = TaskRegistry::new();
        let (running, _tx1) = registry.create_task("running");
        let (finished, _tx2) = registry.create_task("finished");
        let (consumed, _tx3) = registry.create_task("consumed");

        registry.mark_terminal(&finished);
        registry.mark_terminal(&consumed);
        let _rx = registry.get_channel(&consumed).unwrap();

        assert_eq!(registry.sweep(Duration::from_secs(60)), 0);
        assert_eq!(registry.sweep(Duration::ZERO), 1);
        assert!(registry.contains(&running));
        assert!(!registry.contains(&finished));
        assert!(registry.contains(&consumed));
    }
}
