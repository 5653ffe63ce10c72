//! LLM-backed research collaborators.
//!
//! [`OpenRouterClient`] talks to an OpenAI-compatible chat completions API;
//! [`AnswerAgent`] turns it into the summarize, draft, fact-check and
//! finalize capabilities the pipeline consumes.

mod agent;
mod client;
mod prompts;

pub use agent::AnswerAgent;
pub use client::{ChatModel, OpenRouterClient};
