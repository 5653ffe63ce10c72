//! Chat completion client for OpenRouter (or any OpenAI-compatible API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use deepresearch_shared::{DeepResearchError, LlmConfig, Result, RetryPolicy, with_retry};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("DeepResearch/", env!("CARGO_PKG_VERSION"));

/// Text generation backend (allows mocking).
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete a single-turn prompt and return the trimmed reply.
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String>;
}

/// [`ChatModel`] backed by the `/chat/completions` endpoint.
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
    code: Option<u16>,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DeepResearchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            retry,
        })
    }

    async fn complete_once(&self, body: &CompletionRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeepResearchError::Network("llm request timed out".into())
                } else {
                    DeepResearchError::Network(format!("llm request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DeepResearchError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| DeepResearchError::parse(format!("completion response: {e}")))?;

        // Some providers report failures inside a 200 body.
        if let Some(error) = parsed.error {
            return Err(match error.code {
                Some(code) if code >= 400 => DeepResearchError::Upstream {
                    status: code,
                    message: error.message,
                },
                _ => DeepResearchError::Llm(error.message),
            });
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(DeepResearchError::Llm("model returned an empty completion".into()));
        }
        Ok(content)
    }
}

#[async_trait]
impl ChatModel for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
            temperature,
        };

        let content = with_retry(&self.retry, "chat completion", || self.complete_once(&body)).await?;
        debug!(reply_len = content.len(), "completion received");
        Ok(content)
    }
}
