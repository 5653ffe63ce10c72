//! In-memory collaborators for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;

use deepresearch_shared::{
    Collaborators, DeepResearchError, DraftAnswer, Drafter, ExtractedPage, Extraction,
    FactCheckVerdict, FactCheckedAnswer, FactChecker, FinalAnswer, Finalizer, HistoryEntry,
    HistoryRecord, HistoryStore, INSUFFICIENT_RESEARCH, PageExtractor, QueryGenerator,
    ResearchBundle, ResearchId, Result, SearchDepth, SearchHit, SearchProvider, Source,
    Summarizer,
};

/// Returns the same URLs for every query.
pub struct FakeSearch {
    urls: Vec<String>,
    fail: bool,
}

impl FakeSearch {
    pub fn with_urls(urls: &[&str]) -> Self {
        Self {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            urls: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, _query: &str, max_results: usize, _depth: SearchDepth) -> Result<Vec<SearchHit>> {
        if self.fail {
            return Err(DeepResearchError::Network("search offline".into()));
        }
        Ok(self
            .urls
            .iter()
            .take(max_results)
            .map(|url| SearchHit {
                url: url.clone(),
                title: format!("Title of {url}"),
                snippet: String::new(),
            })
            .collect())
    }
}

/// Extracts every URL except those containing "broken".
pub struct FakeExtractor;

#[async_trait]
impl PageExtractor for FakeExtractor {
    async fn extract(&self, url: &str) -> Extraction {
        if url.contains("broken") {
            return Extraction::Failed {
                url: url.to_string(),
                reason: "connection refused".into(),
            };
        }
        Extraction::Extracted(ExtractedPage {
            url: url.to_string(),
            title: format!("Page {url}"),
            text: format!("Facts found at {url}."),
        })
    }
}

pub struct EchoQueries;

#[async_trait]
impl QueryGenerator for EchoQueries {
    async fn generate(&self, question: &str, count: usize) -> Result<Vec<String>> {
        Ok((0..count).map(|i| format!("{question} #{i}")).collect())
    }
}

pub struct CountingSummarizer;

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(&self, _question: &str, pages: &[ExtractedPage]) -> Result<String> {
        Ok(format!("summary of {} pages", pages.len()))
    }
}

pub struct FakeDrafter;

#[async_trait]
impl Drafter for FakeDrafter {
    async fn draft(&self, bundle: &ResearchBundle) -> Result<DraftAnswer> {
        let answer = if bundle.summary.is_summary() {
            format!("draft: {}", bundle.summary.as_text())
        } else {
            INSUFFICIENT_RESEARCH.to_string()
        };
        Ok(DraftAnswer {
            question: bundle.question.clone(),
            answer,
            sources: bundle.sources.clone(),
        })
    }
}

pub struct FailingDrafter;

#[async_trait]
impl Drafter for FailingDrafter {
    async fn draft(&self, _bundle: &ResearchBundle) -> Result<DraftAnswer> {
        Err(DeepResearchError::Llm("model refused".into()))
    }
}

pub struct PanickingDrafter;

#[async_trait]
impl Drafter for PanickingDrafter {
    async fn draft(&self, _bundle: &ResearchBundle) -> Result<DraftAnswer> {
        panic!("drafter exploded");
    }
}

/// Blocks every draft until a permit is released, counting entries.
pub struct GatedDrafter {
    pub gate: Arc<Semaphore>,
    pub entered: Arc<AtomicUsize>,
}

impl GatedDrafter {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            entered: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Drafter for GatedDrafter {
    async fn draft(&self, bundle: &ResearchBundle) -> Result<DraftAnswer> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| DeepResearchError::Internal(e.to_string()))?;
        permit.forget();
        FakeDrafter.draft(bundle).await
    }
}

pub struct FakeFactChecker;

#[async_trait]
impl FactChecker for FakeFactChecker {
    async fn fact_check(&self, draft: &DraftAnswer, _bundle: &ResearchBundle) -> Result<FactCheckedAnswer> {
        Ok(FactCheckedAnswer {
            question: draft.question.clone(),
            answer: draft.answer.clone(),
            sources: draft.sources.clone(),
            verdict: FactCheckVerdict::Checked("all claims supported".into()),
        })
    }
}

pub struct FakeFinalizer;

#[async_trait]
impl Finalizer for FakeFinalizer {
    async fn finalize(&self, checked: &FactCheckedAnswer) -> Result<FinalAnswer> {
        Ok(FinalAnswer {
            question: checked.question.clone(),
            answer: format!("final: {}", checked.answer),
            sources: checked.sources.clone(),
        })
    }
}

pub struct FailingFinalizer;

#[async_trait]
impl Finalizer for FailingFinalizer {
    async fn finalize(&self, _checked: &FactCheckedAnswer) -> Result<FinalAnswer> {
        Err(DeepResearchError::Upstream {
            status: 400,
            message: "bad request".into(),
        })
    }
}

/// Collaborators that succeed end to end with two sources.
pub fn fake_collaborators() -> Collaborators {
    Collaborators {
        search: Arc::new(FakeSearch::with_urls(&["https://a.example", "https://b.example"])),
        extractor: Arc::new(FakeExtractor),
        queries: Arc::new(EchoQueries),
        summarizer: Arc::new(CountingSummarizer),
        drafter: Arc::new(FakeDrafter),
        fact_checker: Arc::new(FakeFactChecker),
        finalizer: Arc::new(FakeFinalizer),
    }
}

/// History kept in a vector.
#[derive(Default)]
pub struct MemoryHistory {
    pub records: Mutex<Vec<HistoryRecord>>,
    pub fail: bool,
}

impl MemoryHistory {
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn save(&self, question: &str, answer: &str, sources: &[Source]) -> Result<ResearchId> {
        if self.fail {
            return Err(DeepResearchError::Storage("disk full".into()));
        }
        let id = ResearchId::new();
        self.records.lock().unwrap().push(HistoryRecord {
            id,
            timestamp: Utc::now(),
            question: question.to_string(),
            answer: answer.to_string(),
            sources: sources.to_vec(),
        });
        Ok(id)
    }

    async fn load(&self, id: &ResearchId) -> Result<Option<HistoryRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == *id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .map(|r| HistoryEntry {
                id: r.id,
                timestamp: r.timestamp,
                question: r.question.clone(),
            })
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.records.lock().unwrap().clear();
        Ok(())
    }
}
