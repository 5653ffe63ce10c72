//! Forward-only pipeline state.
//!
//! A [`PipelineState`] is filled one slot at a time through [`StageOutput`].
//! Slots are written once, in order, and only when the upstream slot exists.

use deepresearch_shared::{
    DeepResearchError, DraftAnswer, FactCheckedAnswer, FinalAnswer, ResearchBundle, Result,
};

use crate::orchestrator::Stage;

/// Output of one stage, tagged by the slot it fills.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Research(ResearchBundle),
    Draft(DraftAnswer),
    FactCheck(FactCheckedAnswer),
    Final(FinalAnswer),
}

impl StageOutput {
    /// Stage that produces this output.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Research(_) => Stage::Research,
            Self::Draft(_) => Stage::Draft,
            Self::FactCheck(_) => Stage::FactCheck,
            Self::Final(_) => Stage::Finalize,
        }
    }
}

/// Accumulated state of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    question: String,
    research: Option<ResearchBundle>,
    draft: Option<DraftAnswer>,
    fact_check: Option<FactCheckedAnswer>,
    final_answer: Option<FinalAnswer>,
    stage: Stage,
    errors: Vec<String>,
}

impl PipelineState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            research: None,
            draft: None,
            fact_check: None,
            final_answer: None,
            stage: Stage::Research,
            errors: Vec::new(),
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn research(&self) -> Option<&ResearchBundle> {
        self.research.as_ref()
    }

    pub fn draft(&self) -> Option<&DraftAnswer> {
        self.draft.as_ref()
    }

    pub fn fact_check(&self) -> Option<&FactCheckedAnswer> {
        self.fact_check.as_ref()
    }

    pub fn final_answer(&self) -> Option<&FinalAnswer> {
        self.final_answer.as_ref()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Write a stage output into its slot and advance to the next stage.
    ///
    /// Fails if the slot is already filled, if the output does not belong to
    /// the current stage, or if the upstream slot is empty.
    pub fn record(&mut self, output: StageOutput) -> Result<()> {
        let stage = output.stage();
        if stage != self.stage {
            return Err(DeepResearchError::validation(format!(
                "cannot record {stage} output while in {} stage",
                self.stage
            )));
        }

        let upstream_ready = match stage {
            Stage::Research => true,
            Stage::Draft => self.research.is_some(),
            Stage::FactCheck => self.draft.is_some(),
            Stage::Finalize => self.fact_check.is_some(),
            Stage::Done | Stage::Error => false,
        };
        if !upstream_ready {
            return Err(DeepResearchError::validation(format!(
                "{stage} output recorded without its upstream result"
            )));
        }

        match output {
            StageOutput::Research(bundle) => fill(&mut self.research, bundle, stage)?,
            StageOutput::Draft(draft) => fill(&mut self.draft, draft, stage)?,
            StageOutput::FactCheck(checked) => fill(&mut self.fact_check, checked, stage)?,
            StageOutput::Final(answer) => fill(&mut self.final_answer, answer, stage)?,
        }
        self.stage = stage.next();
        Ok(())
    }

    /// Record a stage failure and route to the error state.
    pub fn fail(&mut self, stage: Stage, error: impl std::fmt::Display) {
        self.errors
            .push(format!("Error in {} step: {error}", stage.label()));
        self.stage = Stage::Error;
    }
}

fn fill<T>(slot: &mut Option<T>, value: T, stage: Stage) -> Result<()> {
    if slot.is_some() {
        return Err(DeepResearchError::validation(format!(
            "{stage} result already recorded"
        )));
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use deepresearch_shared::{ResearchSummary, Source};

    use super::*;

    fn bundle() -> ResearchBundle {
        ResearchBundle {
            question: "q".into(),
            summary: ResearchSummary::Summary("s".into()),
            sources: vec![Source {
                url: "https://a.example".into(),
                title: "A".into(),
            }],
            records: Vec::new(),
        }
    }

    fn draft() -> DraftAnswer {
        DraftAnswer {
            question: "q".into(),
            answer: "draft".into(),
            sources: Vec::new(),
        }
    }

    #[test]
    fn records_forward_in_order() {
        let mut state = PipelineState::new("q");
        assert_eq!(state.stage(), Stage::Research);

        state.record(StageOutput::Research(bundle())).unwrap();
        assert_eq!(state.stage(), Stage::Draft);

        state.record(StageOutput::Draft(draft())).unwrap();
        assert_eq!(state.stage(), Stage::FactCheck);
        assert_eq!(state.draft().unwrap().answer, "draft");
        assert!(state.research().is_some());
    }

    #[test]
    fn rejects_out_of_order_output() {
        let mut state = PipelineState::new("q");
        let err = state.record(StageOutput::Draft(draft())).unwrap_err();
        assert!(matches!(err, DeepResearchError::Validation { .. }));
        assert!(state.draft().is_none());
        assert_eq!(state.stage(), Stage::Research);
    }

    #[test]
    fn rejects_second_write_to_a_slot() {
        let mut state = PipelineState::new("q");
        state.record(StageOutput::Research(bundle())).unwrap();
        assert!(state.record(StageOutput::Research(bundle())).is_err());
        assert_eq!(state.research(), Some(&bundle()));
    }

    #[test]
    fn nothing_records_after_failure() {
        let mut state = PipelineState::new("q");
        state.record(StageOutput::Research(bundle())).unwrap();
        state.fail(Stage::Draft, "boom");

        assert_eq!(state.stage(), Stage::Error);
        assert_eq!(state.errors(), ["Error in draft answer step: boom"]);
        assert!(state.record(StageOutput::Draft(draft())).is_err());
    }
}
