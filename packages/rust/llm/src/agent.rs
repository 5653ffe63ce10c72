//! LLM-backed summarize, draft, fact-check and finalize steps.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use deepresearch_shared::{
    DraftAnswer, Drafter, ExtractedPage, FactCheckVerdict, FactCheckedAnswer, FactChecker,
    FinalAnswer, Finalizer, INSUFFICIENT_RESEARCH, LlmConfig, ResearchBundle, Result, Summarizer,
};

use crate::client::ChatModel;
use crate::prompts::{self, Excerpt};

/// Answer-writing agent built on a [`ChatModel`].
#[derive(Clone)]
pub struct AnswerAgent {
    model: Arc<dyn ChatModel>,
    research_temperature: f32,
    answer_temperature: f32,
    excerpt_chars: usize,
}

impl AnswerAgent {
    pub fn new(model: Arc<dyn ChatModel>, config: &LlmConfig) -> Self {
        Self {
            model,
            research_temperature: config.research_temperature,
            answer_temperature: config.answer_temperature,
            excerpt_chars: config.excerpt_chars,
        }
    }
}

#[async_trait]
impl Summarizer for AnswerAgent {
    #[instrument(skip_all, fields(pages = pages.len()))]
    async fn summarize(&self, question: &str, pages: &[ExtractedPage]) -> Result<String> {
        let content = prompts::format_excerpts(
            pages.iter().map(|p| Excerpt {
                title: &p.title,
                url: &p.url,
                text: &p.text,
            }),
            self.excerpt_chars,
        );
        self.model
            .complete(&prompts::summarize(question, &content), self.research_temperature)
            .await
    }
}

#[async_trait]
impl Drafter for AnswerAgent {
    #[instrument(skip_all)]
    async fn draft(&self, bundle: &ResearchBundle) -> Result<DraftAnswer> {
        let answer = if bundle.summary.is_summary() {
            let prompt = prompts::draft(
                &bundle.question,
                &bundle.summary.as_text(),
                &prompts::format_sources(&bundle.sources),
            );
            self.model.complete(&prompt, self.answer_temperature).await?
        } else {
            warn!("no research summary available, skipping drafting");
            INSUFFICIENT_RESEARCH.to_string()
        };

        Ok(DraftAnswer {
            question: bundle.question.clone(),
            answer,
            sources: bundle.sources.clone(),
        })
    }
}

#[async_trait]
impl FactChecker for AnswerAgent {
    #[instrument(skip_all)]
    async fn fact_check(
        &self,
        draft: &DraftAnswer,
        bundle: &ResearchBundle,
    ) -> Result<FactCheckedAnswer> {
        if draft.answer.trim().is_empty() || bundle.extracted().next().is_none() {
            warn!("insufficient data for fact checking");
            return Ok(FactCheckedAnswer::skipped(
                draft,
                "insufficient data for fact checking",
            ));
        }

        let sources = prompts::format_excerpts(
            bundle.extracted().map(|(record, text)| Excerpt {
                title: &record.title,
                url: &record.url,
                text,
            }),
            self.excerpt_chars,
        );
        let prompt = prompts::fact_check(&draft.question, &draft.answer, &sources);

        match self.model.complete(&prompt, self.research_temperature).await {
            Ok(feedback) => Ok(FactCheckedAnswer {
                question: draft.question.clone(),
                answer: draft.answer.clone(),
                sources: draft.sources.clone(),
                verdict: FactCheckVerdict::Checked(feedback),
            }),
            Err(e) => {
                warn!(error = %e, "fact check failed, keeping draft");
                Ok(FactCheckedAnswer::skipped(
                    draft,
                    format!("Error in fact checking: {e}"),
                ))
            }
        }
    }
}

#[async_trait]
impl Finalizer for AnswerAgent {
    #[instrument(skip_all)]
    async fn finalize(&self, checked: &FactCheckedAnswer) -> Result<FinalAnswer> {
        let keep_draft = || FinalAnswer {
            question: checked.question.clone(),
            answer: checked.answer.clone(),
            sources: checked.sources.clone(),
        };

        let feedback = match &checked.verdict {
            FactCheckVerdict::Checked(feedback) => feedback,
            FactCheckVerdict::Skipped(reason) => {
                info!(%reason, "fact check skipped, draft becomes final");
                return Ok(keep_draft());
            }
        };

        let prompt = prompts::finalize(
            &checked.question,
            &checked.answer,
            feedback,
            &prompts::format_sources(&checked.sources),
        );
        match self.model.complete(&prompt, self.answer_temperature).await {
            Ok(answer) => Ok(FinalAnswer {
                answer,
                ..keep_draft()
            }),
            Err(e) => {
                warn!(error = %e, "finalization failed, returning draft");
                Ok(keep_draft())
            }
        }
    }
}
