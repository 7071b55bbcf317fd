//! Agent management endpoints and per-agent task commands.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use super::types::{
    AgentResponse, CreateAgentRequest, CreateTaskRequest, DeleteTaskQuery, MessageResponse,
    TaskResponse, UpdateAgentRequest,
};
use super::AppState;
use crate::commands::CreateTaskInput;
use crate::error::{ApiError, ApiResult};
use crate::prober::probe_agent;
use crate::registry::AgentPatch;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", get(list_agents).post(create_agent))
        .route(
            "/agent/:id",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .route("/agent/:id/tasks", get(list_agent_tasks))
        .route("/agent/:id/task", post(create_agent_task))
        .route("/agent/:id/tasks/:task_id", delete(delete_agent_task))
        .route("/agent/:id/tasks/:task_id/pause", post(pause_task))
        .route("/agent/:id/tasks/:task_id/resume", post(resume_task))
        .route(
            "/agent/:id/tasks/:task_id/force_download",
            post(force_download_task),
        )
}

async fn agent_response(state: &AppState, agent: &crate::registry::Agent) -> AgentResponse {
    let health = state.health.snapshot(agent.uuid).await;
    AgentResponse::from_parts(agent, &health)
}

/// GET /v1/agents
async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<AgentResponse>> {
    let agents = state.registry.list().await;
    let mut responses = Vec::with_capacity(agents.len());
    for agent in &agents {
        responses.push(agent_response(&state, agent).await);
    }
    Json(responses)
}

/// POST /v1/agents
///
/// Connectivity is verified against the candidate before anything is
/// persisted — a misconfigured agent is rejected up front instead of
/// sitting ERRORED in the registry.
async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAgentRequest>,
) -> ApiResult<Json<AgentResponse>> {
    let input = req.into();
    let candidate = state.registry.candidate(&input)?;

    let instance = probe_agent(state.factory.as_ref(), &candidate)
        .await
        .map_err(|e| {
            ApiError::upstream("Could not connect to the agent instance").with_detail(e)
        })?;

    let agent = state.registry.create(input).await?;
    state.health.record_active(agent.uuid, instance).await;
    state.prober.watch(agent.uuid).await;

    Ok(Json(agent_response(&state, &agent).await))
}

/// GET /v1/agent/{uuid}
async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AgentResponse>> {
    let agent = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;
    Ok(Json(agent_response(&state, &agent).await))
}

/// PUT /v1/agent/{uuid}
///
/// Partial update; the merged record must be reachable before it replaces
/// the stored one.
async fn update_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAgentRequest>,
) -> ApiResult<Json<AgentResponse>> {
    let current = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;

    let patch: AgentPatch = req.into();

    // Probe with the values the update would leave in place.
    let mut merged = current.clone();
    if let Some(name) = patch.name.as_deref() {
        merged.name = name.trim().to_string();
    }
    if let Some(address) = patch.address.as_deref() {
        merged.address = crate::registry::canonicalize_address(address)?;
    }
    if let Some(token) = patch.token.as_deref() {
        merged.token = state
            .registry
            .secrets()
            .encrypt(token.trim())
            .map_err(|_| ApiError::internal("Failed to store agent credentials"))?;
    }

    let instance = probe_agent(state.factory.as_ref(), &merged)
        .await
        .map_err(|e| {
            ApiError::upstream("Could not connect to the agent instance").with_detail(e)
        })?;

    let agent = state.registry.update(id, patch).await?;
    state.health.record_active(agent.uuid, instance).await;

    Ok(Json(agent_response(&state, &agent).await))
}

/// DELETE /v1/agent/{uuid}
async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.registry.delete(id).await {
        return Err(ApiError::not_found("Agent not found"));
    }

    // Stop probing; the next aggregation cycle no longer sees its tasks.
    state.prober.unwatch(id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/agent/{uuid}/tasks
async fn list_agent_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<TaskResponse>>> {
    let agent = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;

    let tasks = state.aggregator.collect_one(&agent).await?;
    let summary = agent_response(&state, &agent).await;
    Ok(Json(
        tasks
            .into_iter()
            .map(|t| TaskResponse::from_task(t, Some(summary.clone())))
            .collect(),
    ))
}

/// POST /v1/agent/{uuid}/task
async fn create_agent_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<TaskResponse>)> {
    let task = state
        .commands
        .create_task(
            id,
            CreateTaskInput {
                magnet_uri: req.magnet_uri,
                category: req.category,
                tags: req.tags,
                directory: req.directory,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(TaskResponse::from_task(task, None))))
}

/// DELETE /v1/agent/{uuid}/tasks/{id}
async fn delete_agent_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(Uuid, String)>,
    Query(query): Query<DeleteTaskQuery>,
) -> ApiResult<StatusCode> {
    state.commands.delete_task(id, &task_id, query.purge).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/agent/{uuid}/tasks/{id}/pause
async fn pause_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<MessageResponse>> {
    state.commands.pause_task(id, &task_id).await?;
    Ok(Json(MessageResponse {
        message: "Task paused".to_string(),
    }))
}

/// POST /v1/agent/{uuid}/tasks/{id}/resume
async fn resume_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<MessageResponse>> {
    state.commands.resume_task(id, &task_id).await?;
    Ok(Json(MessageResponse {
        message: "Task resumed".to_string(),
    }))
}

/// POST /v1/agent/{uuid}/tasks/{id}/force_download
async fn force_download_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<MessageResponse>> {
    state.commands.force_download_task(id, &task_id).await?;
    Ok(Json(MessageResponse {
        message: "Task download forced".to_string(),
    }))
}
