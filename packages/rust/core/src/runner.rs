//! Synchronous and asynchronous entry points into the pipeline.
//!
//! Both runners catch panics from the pipeline and persist the outcome to the
//! history store (when one is configured) exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

use deepresearch_shared::{
    DeepResearchError, HistoryStore, OutcomeStatus, ProgressStatus, ProgressUpdate,
    ResearchOutcome, Result, RunnerConfig, TaskId,
};

use crate::orchestrator::{ProgressReporter, Stage, StageOrchestrator};
use crate::tasks::{ProgressSender, TaskRegistry};

/// Progress reported once a worker picks a task up.
pub const STARTING_PROGRESS: u8 = 5;

/// Runs the pipeline inline and returns its outcome.
#[derive(Clone)]
pub struct SynchronousRunner {
    orchestrator: StageOrchestrator,
    history: Option<Arc<dyn HistoryStore>>,
}

impl SynchronousRunner {
    pub fn new(orchestrator: StageOrchestrator) -> Self {
        Self {
            orchestrator,
            history: None,
        }
    }

    /// Persist every outcome to `history`.
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    #[instrument(skip_all, fields(question = %question))]
    pub async fn run(&self, question: &str) -> ResearchOutcome {
        let orchestrator = self.orchestrator.clone();
        let owned = question.to_string();
        let joined = tokio::spawn(async move { orchestrator.run(&owned).await }).await;

        let mut outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => ResearchOutcome::crashed(question, join_error_message(e)),
        };
        if let Some(history) = &self.history {
            persist(history.as_ref(), &mut outcome).await;
        }
        info!(status = outcome.status.as_str(), "research finished");
        outcome
    }
}

/// Runs pipelines in the background on a bounded worker pool.
///
/// At most `max_workers` pipelines execute at once and at most
/// `queue_capacity` more wait for a worker. Submissions beyond that are
/// rejected with [`DeepResearchError::Overloaded`].
#[derive(Clone)]
pub struct AsyncRunner {
    orchestrator: StageOrchestrator,
    history: Option<Arc<dyn HistoryStore>>,
    registry: TaskRegistry,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    capacity: usize,
    retention: Duration,
}

impl AsyncRunner {
    pub fn new(orchestrator: StageOrchestrator, registry: TaskRegistry, config: &RunnerConfig) -> Self {
        let workers = config.max_workers.max(1);
        let capacity = workers + config.queue_capacity;
        Self {
            orchestrator,
            history: None,
            registry,
            admission: Arc::new(Semaphore::new(capacity)),
            workers: Arc::new(Semaphore::new(workers)),
            capacity,
            retention: config.task_retention(),
        }
    }

    /// Persist every outcome to `history` before its terminal event.
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Start a pipeline for `question` and return its task id immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, question: &str) -> Result<TaskId> {
        self.registry.sweep(self.retention);

        let admission = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| DeepResearchError::Overloaded {
                capacity: self.capacity,
            })?;

        let (task_id, sender) = self.registry.create_task(question);
        let job = Job {
            task_id,
            question: question.to_string(),
            orchestrator: self.orchestrator.clone(),
            history: self.history.clone(),
            emitter: Arc::new(Emitter::new(task_id, sender, self.registry.clone())),
        };
        let workers = self.workers.clone();

        let handle = tokio::spawn(async move {
            let _admission = admission;
            let Ok(_worker) = workers.acquire_owned().await else {
                warn!(task_id = %job.task_id, "worker pool closed, dropping task");
                return;
            };
            job.execute().await;
        });
        self.registry.attach_handle(&task_id, handle);

        info!(%task_id, "research task submitted");
        Ok(task_id)
    }
}

/// One background pipeline execution.
struct Job {
    task_id: TaskId,
    question: String,
    orchestrator: StageOrchestrator,
    history: Option<Arc<dyn HistoryStore>>,
    emitter: Arc<Emitter>,
}

impl Job {
    #[instrument(skip_all, fields(task_id = %self.task_id))]
    async fn execute(self) {
        self.emitter.send(ProgressUpdate::new(
            ProgressStatus::Starting,
            "starting",
            "Starting research",
            STARTING_PROGRESS,
        ));

        let orchestrator = self.orchestrator;
        let emitter = self.emitter.clone();
        let question = self.question.clone();
        let joined = tokio::spawn(async move {
            orchestrator.run_with(&question, emitter.as_ref()).await
        })
        .await;

        let mut outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => ResearchOutcome::crashed(&self.question, join_error_message(e)),
        };
        if let Some(history) = &self.history {
            persist(history.as_ref(), &mut outcome).await;
        }

        let terminal = match outcome.status {
            OutcomeStatus::Success | OutcomeStatus::Partial => ProgressUpdate::completed(outcome),
            OutcomeStatus::Failed | OutcomeStatus::Error => {
                let message = outcome
                    .errors
                    .last()
                    .cloned()
                    .unwrap_or_else(|| outcome.answer.clone());
                ProgressUpdate::error(message, self.emitter.last_progress(), outcome)
            }
        };
        self.emitter.finish(terminal);
    }
}

/// Sends progress for one task, keeping values non-decreasing.
struct Emitter {
    task_id: TaskId,
    sender: ProgressSender,
    registry: TaskRegistry,
    last: AtomicU8,
    connected: AtomicBool,
}

impl Emitter {
    fn new(task_id: TaskId, sender: ProgressSender, registry: TaskRegistry) -> Self {
        Self {
            task_id,
            sender,
            registry,
            last: AtomicU8::new(0),
            connected: AtomicBool::new(true),
        }
    }

    fn last_progress(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    fn send(&self, mut update: ProgressUpdate) {
        let previous = self.last.fetch_max(update.progress, Ordering::SeqCst);
        update.progress = update.progress.max(previous);

        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        if self.sender.send(update).is_err() {
            // The consumer went away; keep running but stop tracking the task.
            self.connected.store(false, Ordering::SeqCst);
            self.registry.remove_task(&self.task_id);
            debug!(task_id = %self.task_id, "progress consumer disconnected");
        }
    }

    fn finish(&self, terminal: ProgressUpdate) {
        self.registry.mark_terminal(&self.task_id);
        self.send(terminal);
    }
}

impl ProgressReporter for Emitter {
    fn stage_started(&self, stage: Stage) {
        let (start, _) = stage.checkpoints();
        self.send(ProgressUpdate::new(
            ProgressStatus::InProgress,
            stage.step_name(),
            stage.start_message(),
            start,
        ));
    }

    fn stage_finished(&self, stage: Stage) {
        let (_, end) = stage.checkpoints();
        self.send(ProgressUpdate::new(
            ProgressStatus::InProgress,
            stage.step_name(),
            stage.finish_message(),
            end,
        ));
    }
}

/// Save an outcome and stamp its history id. Failures are logged only.
async fn persist(history: &dyn HistoryStore, outcome: &mut ResearchOutcome) {
    match history
        .save(&outcome.question, &outcome.answer, &outcome.sources)
        .await
    {
        Ok(id) => {
            debug!(%id, "outcome saved to history");
            outcome.id = Some(id);
        }
        Err(e) => warn!(error = %e, "failed to save research history"),
    }
}

fn join_error_message(error: JoinError) -> String {
    if error.is_cancelled() {
        return "research task was cancelled".to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "research task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::orchestrator::PipelineSettings;
    use crate::testing::{
        FailingDrafter, GatedDrafter, MemoryHistory, PanickingDrafter, fake_collaborators,
    };
    use deepresearch_shared::Collaborators;

    fn orchestrator(collaborators: Collaborators) -> StageOrchestrator {
        StageOrchestrator::new(collaborators, PipelineSettings::default())
    }

    fn runner_config(max_workers: usize, queue_capacity: usize) -> RunnerConfig {
        RunnerConfig {
            max_workers,
            queue_capacity,
            ..RunnerConfig::default()
        }
    }

    async fn drain(registry: &TaskRegistry, id: &TaskId) -> Vec<ProgressUpdate> {
        let mut rx = registry.get_channel(id).unwrap();
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            let terminal = update.is_terminal();
            updates.push(update);
            if terminal {
                break;
            }
        }
        updates
    }

    #[tokio::test]
    async fn sync_runner_persists_and_stamps_id() {
        let history = Arc::new(MemoryHistory::default());
        let runner =
            SynchronousRunner::new(orchestrator(fake_collaborators())).with_history(history.clone());

        let outcome = runner.run("q").await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(outcome.id.is_some());
        assert_eq!(history.count(), 1);
    }

    #[tokio::test]
    async fn sync_runner_turns_panic_into_error_outcome() {
        let mut collaborators = fake_collaborators();
        collaborators.drafter = Arc::new(PanickingDrafter);
        let runner = SynchronousRunner::new(orchestrator(collaborators));

        let outcome = runner.run("q").await;

        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.answer.starts_with("An error occurred during research:"));
        assert!(outcome.answer.contains("drafter exploded"));
    }

    #[tokio::test]
    async fn async_run_emits_checkpoints_then_completed() {
        let history = Arc::new(MemoryHistory::default());
        let runner = AsyncRunner::new(
            orchestrator(fake_collaborators()),
            TaskRegistry::new(),
            &runner_config(2, 2),
        )
        .with_history(history.clone());

        let id = runner.submit("q").unwrap();
        let updates = drain(runner.registry(), &id).await;

        let progress: Vec<u8> = updates.iter().map(|u| u.progress).collect();
        assert_eq!(progress, [5u8, 10, 40, 45, 65, 70, 85, 90, 95, 100]);
        assert_eq!(updates[0].status, ProgressStatus::Starting);

        let last = updates.last().unwrap();
        assert_eq!(last.status, ProgressStatus::Completed);
        let result = last.result.as_ref().unwrap();
        assert_eq!(result.status, OutcomeStatus::Success);
        assert!(result.id.is_some());
        assert_eq!(history.count(), 1);
    }

    #[tokio::test]
    async fn stage_failure_ends_with_error_at_last_progress() {
        let mut collaborators = fake_collaborators();
        collaborators.drafter = Arc::new(FailingDrafter);
        let runner = AsyncRunner::new(
            orchestrator(collaborators),
            TaskRegistry::new(),
            &runner_config(1, 0),
        );

        let id = runner.submit("q").unwrap();
        let updates = drain(runner.registry(), &id).await;

        let terminal = updates.last().unwrap();
        assert_eq!(terminal.status, ProgressStatus::Error);
        assert_eq!(terminal.progress, 45);
        assert!(terminal.message.starts_with("Error in draft answer step:"));
        assert_eq!(
            terminal.result.as_ref().unwrap().status,
            OutcomeStatus::Failed
        );
        assert_eq!(updates.iter().filter(|u| u.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn panic_ends_with_error_terminal() {
        let mut collaborators = fake_collaborators();
        collaborators.drafter = Arc::new(PanickingDrafter);
        let runner = AsyncRunner::new(
            orchestrator(collaborators),
            TaskRegistry::new(),
            &runner_config(1, 0),
        );

        let id = runner.submit("q").unwrap();
        let updates = drain(runner.registry(), &id).await;

        let terminal = updates.last().unwrap();
        assert_eq!(terminal.status, ProgressStatus::Error);
        assert!(terminal.message.contains("drafter exploded"));
        assert_eq!(terminal.result.as_ref().unwrap().status, OutcomeStatus::Error);
    }

    #[tokio::test]
    async fn rejects_submissions_beyond_capacity() {
        let gated = GatedDrafter::new();
        let gate = gated.gate.clone();
        let entered = gated.entered.clone();
        let mut collaborators = fake_collaborators();
        collaborators.drafter = Arc::new(gated);
        let runner = AsyncRunner::new(
            orchestrator(collaborators),
            TaskRegistry::new(),
            &runner_config(1, 1),
        );

        let first = runner.submit("one").unwrap();
        let second = runner.submit("two").unwrap();
        let err = runner.submit("three").unwrap_err();
        assert!(matches!(err, DeepResearchError::Overloaded { capacity: 2 }));
        assert_eq!(runner.registry().len(), 2);

        // Only one worker may be inside the pipeline at a time.
        while entered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(entered.load(Ordering::SeqCst), 1);

        gate.add_permits(2);
        for id in [first, second] {
            let updates = drain(runner.registry(), &id).await;
            assert_eq!(updates.last().unwrap().status, ProgressStatus::Completed);
        }
        assert!(runner.submit("four").is_ok());
    }

    #[tokio::test]
    async fn disconnected_consumer_deregisters_and_run_completes() {
        let history = Arc::new(MemoryHistory::default());
        let runner = AsyncRunner::new(
            orchestrator(fake_collaborators()),
            TaskRegistry::new(),
            &runner_config(1, 0),
        )
        .with_history(history.clone());

        let id = runner.submit("q").unwrap();
        drop(runner.registry().get_channel(&id).unwrap());

        for _ in 0..200 {
            if history.count() == 1 && !runner.registry().contains(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(history.count(), 1);
        assert!(!runner.registry().contains(&id));
    }

    #[tokio::test]
    async fn history_failure_leaves_id_unset() {
        let runner = SynchronousRunner::new(orchestrator(fake_collaborators()))
            .with_history(Arc::new(MemoryHistory::failing()));

        let outcome = runner.run("q").await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(outcome.id.is_none());
    }
}
