//! Capability interfaces consumed by the research pipeline.
//!
//! Concrete implementations live in `deepresearch-web`, `deepresearch-llm` and
//! `deepresearch-storage`; tests substitute in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    DraftAnswer, ExtractedPage, Extraction, FactCheckedAnswer, FinalAnswer, HistoryEntry,
    HistoryRecord, ResearchBundle, ResearchId, SearchDepth, SearchHit, Source,
};

/// Web search.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Ranked results for `query`. An empty vector means "no results".
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: SearchDepth,
    ) -> Result<Vec<SearchHit>>;
}

/// Fetches a URL and pulls readable text out of it.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Extraction;
}

/// Turns a question into search queries.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(&self, question: &str, count: usize) -> Result<Vec<String>>;
}

/// Condenses extracted pages into a research summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, question: &str, pages: &[ExtractedPage]) -> Result<String>;
}

/// Writes the first answer from a research bundle.
#[async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(&self, bundle: &ResearchBundle) -> Result<DraftAnswer>;
}

/// Checks a draft against the research bundle.
#[async_trait]
pub trait FactChecker: Send + Sync {
    async fn fact_check(
        &self,
        draft: &DraftAnswer,
        bundle: &ResearchBundle,
    ) -> Result<FactCheckedAnswer>;
}

/// Produces the final answer from a fact-checked draft.
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, checked: &FactCheckedAnswer) -> Result<FinalAnswer>;
}

/// Persisted research history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save(&self, question: &str, answer: &str, sources: &[Source]) -> Result<ResearchId>;

    async fn load(&self, id: &ResearchId) -> Result<Option<HistoryRecord>>;

    /// All entries, newest first.
    async fn list(&self) -> Result<Vec<HistoryEntry>>;

    async fn clear(&self) -> Result<()>;
}

/// Every collaborator the pipeline needs, built once and shared.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn SearchProvider>,
    pub extractor: Arc<dyn PageExtractor>,
    pub queries: Arc<dyn QueryGenerator>,
    pub summarizer: Arc<dyn Summarizer>,
    pub drafter: Arc<dyn Drafter>,
    pub fact_checker: Arc<dyn FactChecker>,
    pub finalizer: Arc<dyn Finalizer>,
}
