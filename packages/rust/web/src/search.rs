//! Tavily web search client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use deepresearch_shared::{
    DeepResearchError, Result, RetryPolicy, SearchConfig, SearchDepth, SearchHit, SearchProvider,
    with_retry,
};

use crate::transport_error;

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("DeepResearch/", env!("CARGO_PKG_VERSION"));

/// Search provider backed by the Tavily `/search` endpoint.
pub struct TavilySearch {
    client: Client,
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    search_depth: &'static str,
    max_results: usize,
    include_answer: bool,
    include_raw_content: bool,
    include_images: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Option<Vec<SearchResult>>,
}

#[derive(Deserialize)]
struct SearchResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

impl TavilySearch {
    pub fn new(config: &SearchConfig, api_key: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DeepResearchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/search", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            retry,
        })
    }

    async fn search_once(&self, body: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("tavily", e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DeepResearchError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| DeepResearchError::parse(format!("tavily response: {e}")))?;

        let Some(results) = parsed.results else {
            debug!("tavily response carried no results field");
            return Ok(Vec::new());
        };
        Ok(results
            .into_iter()
            .map(|r| SearchHit {
                url: r.url,
                title: r.title,
                snippet: r.content,
            })
            .collect())
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: SearchDepth,
    ) -> Result<Vec<SearchHit>> {
        // Quotes trip up the Tavily query parser.
        let cleaned = query.replace(['"', '\''], "");
        let body = SearchRequest {
            query: &cleaned,
            search_depth: depth.as_str(),
            max_results,
            include_answer: true,
            include_raw_content: false,
            include_images: false,
        };

        let hits = with_retry(&self.retry, "tavily search", || self.search_once(&body)).await?;
        info!(results = hits.len(), "search complete");
        Ok(hits)
    }
}
