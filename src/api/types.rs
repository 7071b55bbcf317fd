//! API request and response types.
//!
//! Field names follow the dashboard contract exactly — agents never echo
//! their token, and task rows carry the originating agent summary so the UI
//! can attribute and filter.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::categories::{CategoryUpdate, NewCategory};
use crate::health::{AgentHealth, Instance};
use crate::registry::{Agent, AgentPatch, AgentStatus, NewAgent};
use crate::task::{MagnetLink, Task, TaskNetwork, TaskPairs, TaskState};

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Whether the server runs with the session guard disabled
    pub dev_mode: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    /// Agent kind, e.g. "qbittorrent"
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
    pub token: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
}

impl From<CreateAgentRequest> for NewAgent {
    fn from(req: CreateAgentRequest) -> Self {
        NewAgent {
            name: req.name,
            kind: req.kind,
            address: req.address,
            token: req.token,
            icon: req.icon,
            color: req.color,
        }
    }
}

/// Partial agent update; omitted fields keep their current value.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub token: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

impl From<UpdateAgentRequest> for AgentPatch {
    fn from(req: UpdateAgentRequest) -> Self {
        AgentPatch {
            name: req.name,
            address: req.address,
            token: req.token,
            icon: req.icon,
            color: req.color,
        }
    }
}

/// Agent as the dashboard sees it: registry record joined with live health.
/// The auth token is deliberately absent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub uuid: Uuid,
    pub name: String,
    pub address: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Zeroed when the agent has never been probed successfully.
    pub instance: Instance,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub color: String,
}

impl AgentResponse {
    pub fn from_parts(agent: &Agent, health: &AgentHealth) -> Self {
        Self {
            uuid: agent.uuid,
            name: agent.name.clone(),
            address: agent.address.clone(),
            status: health.status,
            error: health.last_error.clone(),
            instance: health.instance.clone().unwrap_or_default(),
            icon: agent.icon.clone(),
            color: agent.color.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub magnet_uri: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteTaskQuery {
    #[serde(default)]
    pub purge: bool,
}

/// One normalized task row, attributed to its agent.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub id: String,
    pub agent_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentResponse>,
    pub name: String,
    pub hash: String,
    pub state: TaskState,
    pub category: String,
    pub path: String,
    pub priority: i64,
    pub ratio: f64,
    pub size: i64,
    pub progress: f64,
    pub popularity: f64,
    pub magnet_uri: String,
    pub magnet_link: MagnetLink,
    pub pairs: TaskPairs,
    pub network: TaskNetwork,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl TaskResponse {
    pub fn from_task(task: Task, agent: Option<AgentResponse>) -> Self {
        Self {
            id: task.id,
            agent_id: task.agent_id,
            agent,
            name: task.name,
            hash: task.hash,
            state: task.state,
            category: task.category,
            path: task.path,
            priority: task.priority,
            ratio: task.ratio,
            size: task.size,
            progress: task.progress,
            popularity: task.popularity,
            magnet_uri: task.magnet_uri,
            magnet_link: task.magnet_link,
            pairs: task.pairs,
            network: task.network,
            tags: task.tags,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Categories
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub default_tags: Vec<String>,
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub icon: String,
}

impl From<CreateCategoryRequest> for NewCategory {
    fn from(req: CreateCategoryRequest) -> Self {
        NewCategory {
            name: req.name,
            default_tags: req.default_tags,
            directories: req.directories,
            color: req.color,
            icon: req.icon,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub default_tags: Option<Vec<String>>,
    pub directories: Option<Vec<String>>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

impl From<UpdateCategoryRequest> for CategoryUpdate {
    fn from(req: UpdateCategoryRequest) -> Self {
        CategoryUpdate {
            name: req.name,
            default_tags: req.default_tags,
            directories: req.directories,
            color: req.color,
            icon: req.icon,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub uuid: Uuid,
    pub email: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<crate::users::User> for UserResponse {
    fn from(user: crate::users::User) -> Self {
        Self {
            uuid: user.uuid,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

/// Auth envelope returned by register/login.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
}

/// One active session (the token itself is never listed).
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub user_agent: String,
    pub ip_address: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<crate::sessions::Session> for SessionResponse {
    fn from(session: crate::sessions::Session) -> Self {
        Self {
            id: session.id,
            user_agent: session.user_agent,
            ip_address: session.ip_address,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthBoard;

    #[tokio::test]
    async fn agent_response_never_carries_the_token() {
        let board = HealthBoard::new();
        let agent = Agent {
            uuid: Uuid::new_v4(),
            name: "box".to_string(),
            kind: crate::registry::AgentKind::Qbittorrent,
            address: "http://10.0.0.1:9090".to_string(),
            token: "enc:v1:abcdef".to_string(),
            icon: String::new(),
            color: String::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let health = board.snapshot(agent.uuid).await;
        let response = AgentResponse::from_parts(&agent, &health);
        let json = serde_json::to_string(&response).unwrap();

        assert!(!json.contains("token"));
        assert!(!json.contains("abcdef"));
        assert!(json.contains("\"status\":\"INACTIVE\""));
    }

    #[test]
    fn create_request_maps_type_field_to_kind() {
        let req: CreateAgentRequest = serde_json::from_value(serde_json::json!({
            "name": "box",
            "type": "qbittorrent",
            "address": "http://10.0.0.1:9090",
            "token": "tok"
        }))
        .unwrap();
        assert_eq!(req.kind, "qbittorrent");
        assert_eq!(req.icon, "");
    }
}
