//! Request handlers.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use deepresearch_shared::{HistoryEntry, HistoryRecord, ResearchId, ResearchOutcome, TaskId};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct QuestionRequest {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: TaskId,
}

/// Extract a non-blank question, treating an unreadable body as empty.
fn question_from(body: Option<Json<QuestionRequest>>) -> Result<String, ApiError> {
    let question = body.map(|Json(req)| req.question).unwrap_or_default();
    let question = question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("No question provided".into()));
    }
    Ok(question.to_string())
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Run the whole pipeline and answer when it is done.
#[instrument(skip_all)]
pub async fn research(
    State(state): State<AppState>,
    body: Option<Json<QuestionRequest>>,
) -> Result<Json<ResearchOutcome>, ApiError> {
    let question = question_from(body)?;
    let outcome = state.sync_runner.run(&question).await;
    info!(status = outcome.status.as_str(), "research request answered");
    Ok(Json(outcome))
}

/// Queue a pipeline run and return its task id right away.
#[instrument(skip_all)]
pub async fn research_async(
    State(state): State<AppState>,
    body: Option<Json<QuestionRequest>>,
) -> Result<Json<TaskCreated>, ApiError> {
    let question = question_from(body)?;
    let task_id = state.async_runner.submit(&question)?;
    Ok(Json(TaskCreated { task_id }))
}

/// Server-sent progress events for one task.
#[instrument(skip_all)]
pub async fn stream(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let task_id: TaskId = task_id
        .parse()
        .map_err(|_| ApiError::NotFound("Task not found".into()))?;
    let updates = state.streamer.stream(&task_id)?.into_stream();

    let events = updates.map(|update| {
        Ok::<_, Infallible>(Event::default().json_data(&update).unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode progress event");
            Event::default().comment("encoding error")
        }))
    });
    Ok(Sse::new(events))
}

#[instrument(skip_all)]
pub async fn list_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(state.history.list().await?))
}

#[instrument(skip_all)]
pub async fn get_research(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryRecord>, ApiError> {
    let not_found = || ApiError::NotFound("Research not found".into());
    let id: ResearchId = id.parse().map_err(|_| not_found())?;
    state.history.load(&id).await?.map(Json).ok_or_else(not_found)
}

#[instrument(skip_all)]
pub async fn clear_history(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.history.clear().await?;
    info!("research history cleared");
    Ok(Json(json!({ "status": "cleared" })))
}
