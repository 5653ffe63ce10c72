//! Wires configured collaborators into the pipeline runners.

use std::sync::Arc;

use color_eyre::eyre::Result;
use tracing::{info, warn};

use deepresearch_core::{
    AsyncRunner, PipelineSettings, ProgressStreamer, StageOrchestrator, SynchronousRunner,
    TaskRegistry,
};
use deepresearch_llm::{AnswerAgent, OpenRouterClient};
use deepresearch_server::AppState;
use deepresearch_shared::{AppConfig, Collaborators, HistoryStore, RetryPolicy, read_api_key};
use deepresearch_storage::LibsqlHistory;
use deepresearch_web::{HtmlExtractor, TavilySearch, TemplateQueryGenerator};

/// Everything needed to run research for one process.
pub(crate) struct Engine {
    pub orchestrator: StageOrchestrator,
    pub history: Arc<dyn HistoryStore>,
    pub config: AppConfig,
}

impl Engine {
    /// Build collaborators from config. The LLM key is required; a missing
    /// search key only degrades research to "no results".
    pub(crate) async fn build(config: AppConfig) -> Result<Self> {
        let retry = RetryPolicy::from(&config.retry);
        let llm_key = read_api_key(&config.llm.api_key_env)?;
        let search_key = read_api_key(&config.search.api_key_env).unwrap_or_else(|e| {
            warn!(error = %e, "search API key missing, searches will fail");
            String::new()
        });

        let model = Arc::new(OpenRouterClient::new(&config.llm, llm_key, retry)?);
        let agent = Arc::new(AnswerAgent::new(model, &config.llm));
        let collaborators = Collaborators {
            search: Arc::new(TavilySearch::new(&config.search, search_key, retry)?),
            extractor: Arc::new(HtmlExtractor::new(&config.extract)?),
            queries: Arc::new(TemplateQueryGenerator),
            summarizer: agent.clone(),
            drafter: agent.clone(),
            fact_checker: agent.clone(),
            finalizer: agent,
        };

        let db_path = config.defaults.history_db_path()?;
        let history: Arc<dyn HistoryStore> = Arc::new(LibsqlHistory::open(&db_path).await?);
        info!(db = %db_path.display(), model = %config.llm.model, "research engine ready");

        Ok(Self {
            orchestrator: StageOrchestrator::new(collaborators, PipelineSettings::from(&config)),
            history,
            config,
        })
    }

    pub(crate) fn sync_runner(&self) -> SynchronousRunner {
        SynchronousRunner::new(self.orchestrator.clone()).with_history(self.history.clone())
    }

    /// Async runner plus a streamer sharing one task registry.
    pub(crate) fn async_runner(&self) -> (AsyncRunner, ProgressStreamer) {
        let registry = TaskRegistry::new();
        let runner = AsyncRunner::new(self.orchestrator.clone(), registry.clone(), &self.config.runner)
            .with_history(self.history.clone());
        let streamer = ProgressStreamer::new(registry, self.config.runner.heartbeat_interval());
        (runner, streamer)
    }

    pub(crate) fn app_state(&self) -> AppState {
        let (async_runner, streamer) = self.async_runner();
        AppState {
            sync_runner: self.sync_runner(),
            async_runner,
            streamer,
            history: self.history.clone(),
        }
    }
}
