//! Shared types, error model, configuration and collaborator interfaces for DeepResearch.
//!
//! This crate is the foundation depended on by all other DeepResearch crates.
//! It provides:
//! - [`DeepResearchError`]: the unified error type
//! - Domain types ([`ResearchOutcome`], [`ProgressUpdate`], [`TaskId`], stage payloads)
//! - Configuration ([`AppConfig`], config loading)
//! - Collaborator traits ([`SearchProvider`], [`Drafter`], [`HistoryStore`], ...)
//! - [`with_retry`] for transient network failures

pub mod collaborators;
pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use collaborators::{
    Collaborators, Drafter, FactChecker, Finalizer, HistoryStore, PageExtractor, QueryGenerator,
    SearchProvider, Summarizer,
};
pub use config::{
    AppConfig, DefaultsConfig, ExtractConfig, LlmConfig, RetryConfig, RunnerConfig, SearchConfig,
    ServerConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    read_api_key,
};
pub use error::{DeepResearchError, Result};
pub use retry::{RetryPolicy, with_retry};
pub use types::{
    DraftAnswer, ExtractedPage, Extraction, FAILED_ANSWER, FactCheckVerdict, FactCheckedAnswer,
    FinalAnswer, HistoryEntry, HistoryRecord, INSUFFICIENT_RESEARCH, NO_RELEVANT_CONTENT,
    OutcomeStatus, ProgressStatus, ProgressUpdate, ResearchBundle, ResearchId, ResearchOutcome,
    ResearchSummary, SearchDepth, SearchHit, Source, SourceRecord, TaskId,
};
