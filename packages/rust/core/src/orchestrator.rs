//! Stage orchestrator: RESEARCH → DRAFT → FACT_CHECK → FINALIZE → DONE.
//!
//! Any stage failure routes to the absorbing ERROR state, which logs the
//! accumulated errors and halts. The outcome is built from whatever slots
//! were filled: the final answer, else the draft, else a failure record.

use std::fmt;

use tracing::{error, info, instrument};

use deepresearch_shared::{
    AppConfig, Collaborators, DeepResearchError, FAILED_ANSWER, OutcomeStatus, ResearchOutcome,
    Result, SearchDepth,
};

use crate::research;
use crate::state::{PipelineState, StageOutput};

/// Pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Research,
    Draft,
    FactCheck,
    Finalize,
    Done,
    Error,
}

impl Stage {
    /// The four stages that do work, in execution order.
    pub const WORKING: [Stage; 4] = [Self::Research, Self::Draft, Self::FactCheck, Self::Finalize];

    /// Stage that follows a successful run of this one.
    pub fn next(self) -> Self {
        match self {
            Self::Research => Self::Draft,
            Self::Draft => Self::FactCheck,
            Self::FactCheck => Self::Finalize,
            Self::Finalize | Self::Done => Self::Done,
            Self::Error => Self::Error,
        }
    }

    /// Step name used in progress events.
    pub fn step_name(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Draft => "draft",
            Self::FactCheck => "fact_check",
            Self::Finalize => "finalize",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Human label used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Draft => "draft answer",
            Self::FactCheck => "fact check",
            Self::Finalize => "finalize answer",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Progress percentages emitted before and after the stage runs.
    pub fn checkpoints(self) -> (u8, u8) {
        match self {
            Self::Research => (10, 40),
            Self::Draft => (45, 65),
            Self::FactCheck => (70, 85),
            Self::Finalize => (90, 95),
            Self::Done => (100, 100),
            Self::Error => (0, 0),
        }
    }

    /// Message emitted when the stage starts.
    pub fn start_message(self) -> &'static str {
        match self {
            Self::Research => "Researching the web for relevant information",
            Self::Draft => "Drafting an answer from the research",
            Self::FactCheck => "Fact-checking the draft against sources",
            Self::Finalize => "Finalizing the answer",
            Self::Done => "Research complete",
            Self::Error => "Research failed",
        }
    }

    /// Message emitted when the stage finishes.
    pub fn finish_message(self) -> &'static str {
        match self {
            Self::Research => "Research complete",
            Self::Draft => "Draft answer ready",
            Self::FactCheck => "Fact check complete",
            Self::Finalize => "Final answer ready",
            Self::Done => "Research complete",
            Self::Error => "Research failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.step_name())
    }
}

/// Observer notified around each working stage.
pub trait ProgressReporter: Send + Sync {
    /// Called before a stage runs.
    fn stage_started(&self, stage: Stage);
    /// Called after a stage recorded its output.
    fn stage_finished(&self, stage: Stage);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_finished(&self, _stage: Stage) {}
}

/// Knobs of the research stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub queries_per_question: usize,
    pub max_results: usize,
    pub depth: SearchDepth,
    pub max_urls: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            queries_per_question: config.search.queries_per_question,
            max_results: config.search.max_results,
            depth: config.search.depth,
            max_urls: config.extract.max_urls,
        }
    }
}

/// Runs the four stages for one question.
#[derive(Clone)]
pub struct StageOrchestrator {
    collaborators: Collaborators,
    settings: PipelineSettings,
}

impl StageOrchestrator {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            collaborators,
            settings,
        }
    }

    /// Run the pipeline without progress reporting.
    pub async fn run(&self, question: &str) -> ResearchOutcome {
        self.run_with(question, &SilentProgress).await
    }

    /// Run the pipeline, notifying `progress` around each stage.
    #[instrument(skip_all, fields(question = %question))]
    pub async fn run_with(&self, question: &str, progress: &dyn ProgressReporter) -> ResearchOutcome {
        let mut state = PipelineState::new(question);

        loop {
            let stage = state.stage();
            match stage {
                Stage::Done => {
                    info!("pipeline finished");
                    break;
                }
                Stage::Error => {
                    for message in state.errors() {
                        error!(error = %message, "pipeline halted");
                    }
                    break;
                }
                _ => {
                    progress.stage_started(stage);
                    let recorded = match self.run_stage(stage, &state).await {
                        Ok(output) => state.record(output),
                        Err(e) => Err(e),
                    };
                    match recorded {
                        Ok(()) => progress.stage_finished(stage),
                        Err(e) => state.fail(stage, e),
                    }
                }
            }
        }

        outcome_from(&state)
    }

    async fn run_stage(&self, stage: Stage, state: &PipelineState) -> Result<StageOutput> {
        let c = &self.collaborators;
        match stage {
            Stage::Research => {
                research::gather(c, &self.settings, state.question())
                    .await
                    .map(StageOutput::Research)
            }
            Stage::Draft => {
                let bundle = upstream(state.research(), stage)?;
                c.drafter.draft(bundle).await.map(StageOutput::Draft)
            }
            Stage::FactCheck => {
                let bundle = upstream(state.research(), stage)?;
                let draft = upstream(state.draft(), stage)?;
                c.fact_checker
                    .fact_check(draft, bundle)
                    .await
                    .map(StageOutput::FactCheck)
            }
            Stage::Finalize => {
                let checked = upstream(state.fact_check(), stage)?;
                c.finalizer.finalize(checked).await.map(StageOutput::Final)
            }
            Stage::Done | Stage::Error => Err(DeepResearchError::Internal(format!(
                "{stage} is not a working stage"
            ))),
        }
    }
}

fn upstream<T>(slot: Option<&T>, stage: Stage) -> Result<&T> {
    slot.ok_or_else(|| DeepResearchError::Internal(format!("{stage} stage has no upstream result")))
}

/// Build the outcome from the most advanced filled slot.
fn outcome_from(state: &PipelineState) -> ResearchOutcome {
    let (answer, sources, status) = if let Some(done) = state.final_answer() {
        (done.answer.clone(), done.sources.clone(), OutcomeStatus::Success)
    } else if let Some(draft) = state.draft() {
        (draft.answer.clone(), draft.sources.clone(), OutcomeStatus::Partial)
    } else {
        (FAILED_ANSWER.to_string(), Vec::new(), OutcomeStatus::Failed)
    };

    ResearchOutcome {
        question: state.question().to_string(),
        answer,
        sources,
        status,
        errors: state.errors().to_vec(),
        id: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use deepresearch_shared::{FactCheckVerdict, INSUFFICIENT_RESEARCH, ResearchSummary};

    use super::*;
    use crate::testing::{FailingDrafter, FailingFinalizer, FakeSearch, fake_collaborators};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ProgressReporter for Recorder {
        fn stage_started(&self, stage: Stage) {
            self.0.lock().unwrap().push(format!("start {stage}"));
        }
        fn stage_finished(&self, stage: Stage) {
            self.0.lock().unwrap().push(format!("finish {stage}"));
        }
    }

    #[test]
    fn checkpoints_increase_across_stages() {
        let mut last = 5;
        for stage in Stage::WORKING {
            let (start, end) = stage.checkpoints();
            assert!(start > last && end > start, "{stage}");
            last = end;
        }
        assert!(last < 100);
    }

    #[tokio::test]
    async fn three_sources_produce_success() {
        let mut collaborators = fake_collaborators();
        collaborators.search = Arc::new(FakeSearch::with_urls(&[
            "https://one.example",
            "https://two.example",
            "https://three.example",
        ]));
        let orchestrator = StageOrchestrator::new(collaborators, PipelineSettings::default());

        let outcome = orchestrator.run("What is quantum computing?").await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.sources.len(), 3);
        assert!(outcome.errors.is_empty());
        assert!(!outcome.answer.is_empty());
    }

    #[tokio::test]
    async fn zero_results_still_succeed_with_insufficient_answer() {
        let mut collaborators = fake_collaborators();
        collaborators.search = Arc::new(FakeSearch::with_urls(&[]));
        let orchestrator = StageOrchestrator::new(collaborators, PipelineSettings::default());

        let outcome = orchestrator.run("q").await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(outcome.answer.contains(INSUFFICIENT_RESEARCH));
        assert!(outcome.sources.is_empty());
    }

    #[tokio::test]
    async fn all_extractions_failing_still_succeeds_without_sources() {
        let mut collaborators = fake_collaborators();
        collaborators.search = Arc::new(FakeSearch::with_urls(&[
            "https://broken1.example",
            "https://broken2.example",
        ]));
        let orchestrator = StageOrchestrator::new(collaborators, PipelineSettings::default());

        let outcome = orchestrator.run("q").await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(outcome.answer.contains(INSUFFICIENT_RESEARCH));
        assert!(outcome.sources.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn draft_failure_halts_with_failed_outcome() {
        let mut collaborators = fake_collaborators();
        collaborators.drafter = Arc::new(FailingDrafter);
        let orchestrator = StageOrchestrator::new(collaborators, PipelineSettings::default());
        let recorder = Recorder::default();

        let outcome = orchestrator.run_with("q", &recorder).await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.answer, FAILED_ANSWER);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Error in draft answer step:"));
        assert_eq!(
            *recorder.0.lock().unwrap(),
            ["start research", "finish research", "start draft"]
        );
    }

    #[tokio::test]
    async fn finalize_failure_returns_partial_draft() {
        let mut collaborators = fake_collaborators();
        collaborators.finalizer = Arc::new(FailingFinalizer);
        let orchestrator = StageOrchestrator::new(collaborators, PipelineSettings::default());

        let outcome = orchestrator.run("q").await;

        assert_eq!(outcome.status, OutcomeStatus::Partial);
        assert!(outcome.answer.starts_with("draft:"));
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Error in finalize answer step:"));
    }

    #[tokio::test]
    async fn reporter_sees_every_stage_in_order() {
        let orchestrator =
            StageOrchestrator::new(fake_collaborators(), PipelineSettings::default());
        let recorder = Recorder::default();

        orchestrator.run_with("q", &recorder).await;

        let events = recorder.0.lock().unwrap().clone();
        let expected: Vec<String> = Stage::WORKING
            .iter()
            .flat_map(|s| [format!("start {s}"), format!("finish {s}")])
            .collect();
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn fact_check_verdict_flows_into_final_answer() {
        let orchestrator =
            StageOrchestrator::new(fake_collaborators(), PipelineSettings::default());
        let mut state = PipelineState::new("q");
        for stage in &Stage::WORKING[..3] {
            let output = orchestrator.run_stage(*stage, &state).await.unwrap();
            state.record(output).unwrap();
        }

        let checked = state.fact_check().unwrap();
        assert!(matches!(checked.verdict, FactCheckVerdict::Checked(_)));
        assert!(matches!(
            state.research().unwrap().summary,
            ResearchSummary::Summary(_)
        ));
    }
}
