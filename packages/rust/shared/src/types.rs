//! Core domain types for DeepResearch: identifiers, stage payloads,
//! research outcomes and progress events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary text used when no page could be extracted for a question.
pub const NO_RELEVANT_CONTENT: &str = "No relevant content found.";

/// Draft returned when the research produced no usable summary.
pub const INSUFFICIENT_RESEARCH: &str = "Insufficient research data to provide an answer.";

/// Answer used when the pipeline produced neither a draft nor a final answer.
pub const FAILED_ANSWER: &str = "Failed to generate an answer.";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-sortable identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Identifier of one asynchronous pipeline execution (UUID v7).
    TaskId
);

uuid_id!(
    /// Identifier of a persisted research result (UUID v7).
    ResearchId
);

// ---------------------------------------------------------------------------
// Search & extraction
// ---------------------------------------------------------------------------

/// How much effort the search provider should spend per query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

/// Readable content pulled out of a web page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub url: String,
    pub title: String,
    pub text: String,
}

/// Outcome of extracting a single URL.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Extracted(ExtractedPage),
    Failed { url: String, reason: String },
}

impl Extraction {
    pub fn url(&self) -> &str {
        match self {
            Self::Extracted(page) => &page.url,
            Self::Failed { url, .. } => url,
        }
    }
}

/// A source cited by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
}

/// A visited URL with its extracted text (`None` when extraction failed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub title: String,
    pub text: Option<String>,
}

impl From<Extraction> for SourceRecord {
    fn from(extraction: Extraction) -> Self {
        match extraction {
            Extraction::Extracted(page) => Self {
                url: page.url,
                title: page.title,
                text: Some(page.text),
            },
            Extraction::Failed { url, .. } => Self {
                title: "Unknown".into(),
                url,
                text: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Stage payloads
// ---------------------------------------------------------------------------

/// What the research stage learned about the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum ResearchSummary {
    /// LLM summary of the extracted pages.
    Summary(String),
    /// Nothing could be extracted.
    NoRelevantContent,
    /// Pages were extracted but summarizing them failed.
    Unavailable(String),
}

impl ResearchSummary {
    /// Text form of the summary as fed to downstream prompts.
    pub fn as_text(&self) -> String {
        match self {
            Self::Summary(text) => text.clone(),
            Self::NoRelevantContent => NO_RELEVANT_CONTENT.to_string(),
            Self::Unavailable(reason) => format!("Error in summarization: {reason}"),
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, Self::Summary(text) if !text.trim().is_empty())
    }
}

/// Output of the research stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchBundle {
    pub question: String,
    pub summary: ResearchSummary,
    /// Sources whose text was extracted, in visit order.
    pub sources: Vec<Source>,
    /// Every visited URL, including failed extractions.
    pub records: Vec<SourceRecord>,
}

impl ResearchBundle {
    /// Records that carry extracted text.
    pub fn extracted(&self) -> impl Iterator<Item = (&SourceRecord, &str)> {
        self.records
            .iter()
            .filter_map(|r| r.text.as_deref().map(|text| (r, text)))
    }
}

/// Output of the draft stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftAnswer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
}

/// Result of checking a draft against its sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum FactCheckVerdict {
    /// Fact-check feedback produced by the checker.
    Checked(String),
    /// The check was not performed; the reason says why.
    Skipped(String),
}

/// Output of the fact-check stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckedAnswer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub verdict: FactCheckVerdict,
}

impl FactCheckedAnswer {
    /// Pass a draft through unchanged with a skipped verdict.
    pub fn skipped(draft: &DraftAnswer, reason: impl Into<String>) -> Self {
        Self {
            question: draft.question.clone(),
            answer: draft.answer.clone(),
            sources: draft.sources.clone(),
            verdict: FactCheckVerdict::Skipped(reason.into()),
        }
    }
}

/// Output of the finalize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
}

// ---------------------------------------------------------------------------
// Research outcome
// ---------------------------------------------------------------------------

/// How far the pipeline got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// A final answer was produced.
    Success,
    /// Only a draft was produced.
    Partial,
    /// No answer was produced.
    Failed,
    /// The pipeline itself crashed.
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

/// Result returned by both runners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub errors: Vec<String>,
    /// History id, set once the outcome has been persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResearchId>,
}

impl ResearchOutcome {
    /// Outcome for a pipeline that crashed before producing anything.
    pub fn crashed(question: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            question: question.to_string(),
            answer: format!("An error occurred during research: {error}"),
            sources: Vec::new(),
            status: OutcomeStatus::Error,
            errors: vec![error],
            id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

/// Kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Connected,
    Starting,
    InProgress,
    Heartbeat,
    Completed,
    Error,
}

/// One event on a task's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub status: ProgressStatus,
    pub step: String,
    pub message: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResearchOutcome>,
}

impl ProgressUpdate {
    pub fn new(
        status: ProgressStatus,
        step: impl Into<String>,
        message: impl Into<String>,
        progress: u8,
    ) -> Self {
        Self {
            status,
            step: step.into(),
            message: message.into(),
            progress: progress.min(100),
            result: None,
        }
    }

    pub fn connected() -> Self {
        Self::new(ProgressStatus::Connected, "connected", "Connected to research stream", 0)
    }

    pub fn heartbeat(progress: u8) -> Self {
        Self::new(ProgressStatus::Heartbeat, "heartbeat", "still working", progress)
    }

    pub fn completed(outcome: ResearchOutcome) -> Self {
        Self {
            result: Some(outcome),
            ..Self::new(ProgressStatus::Completed, "done", "Research complete", 100)
        }
    }

    pub fn error(message: impl Into<String>, progress: u8, outcome: ResearchOutcome) -> Self {
        Self {
            result: Some(outcome),
            ..Self::new(ProgressStatus::Error, "error", message, progress)
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ProgressStatus::Completed | ProgressStatus::Error)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// A persisted research result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: ResearchId,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
}

/// History listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: ResearchId,
    pub timestamp: DateTime<Utc>,
    pub question: String,
}
