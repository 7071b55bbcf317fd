//! Aggregated task endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::types::{AgentResponse, DeleteTaskQuery, TaskResponse};
use super::AppState;
use crate::error::ApiResult;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents/tasks", get(list_all_tasks))
        .route("/agents/tasks/:id", delete(delete_task))
}

/// GET /v1/agents/tasks
///
/// One aggregation cycle. Unreachable agents contribute nothing; the
/// response is always the best-effort union of what answered in time.
async fn list_all_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskResponse>> {
    let tasks = state.aggregator.collect_all().await;

    // Join agent summaries once per cycle, not per task.
    let mut summaries: HashMap<Uuid, AgentResponse> = HashMap::new();
    for agent in state.registry.list().await {
        let health = state.health.snapshot(agent.uuid).await;
        summaries.insert(agent.uuid, AgentResponse::from_parts(&agent, &health));
    }

    Json(
        tasks
            .into_iter()
            .map(|task| {
                let agent = summaries.get(&task.agent_id).cloned();
                TaskResponse::from_task(task, agent)
            })
            .collect(),
    )
}

/// DELETE /v1/agents/tasks/{id}?purge=
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteTaskQuery>,
) -> ApiResult<StatusCode> {
    state.commands.delete_task_anywhere(&id, query.purge).await?;
    Ok(StatusCode::NO_CONTENT)
}
