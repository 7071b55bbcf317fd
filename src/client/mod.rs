//! Clients for the native agent protocols.
//!
//! The aggregator, prober and command router depend only on [`AgentClient`];
//! each supported agent kind provides an implementation. Adding a kind means
//! adding a module here and one arm to the factory — the core never branches
//! on type strings.

pub mod qbittorrent;

use async_trait::async_trait;
use std::time::Duration;

use crate::crypto::SecretBox;
use crate::error::ApiError;
use crate::health::Instance;
use crate::registry::{Agent, AgentKind};
use crate::task::Task;

/// Parameters for creating a task on an agent.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskCreation {
    pub magnet_uri: String,
    pub category: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Failure of a native agent call, classified so callers can tell
/// connectivity problems (transient) from configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The call exceeded its deadline.
    #[error("agent did not respond in time")]
    Timeout,

    /// Connection-level failure (refused, reset, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// The agent rejected the stored credentials (401/403).
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The agent answered with a non-auth failure status.
    #[error("agent returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The agent answered with something the client cannot interpret.
    #[error("unexpected response from agent: {0}")]
    Protocol(String),
}

impl AgentError {
    /// Transient failures are connectivity problems worth retrying;
    /// everything else points at configuration or the agent itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Timeout | AgentError::Network(_))
    }

    /// Classify a non-2xx response status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => AgentError::Auth(message),
            _ => AgentError::Upstream { status, message },
        }
    }

    /// Classify a reqwest transport error.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::Timeout
        } else if err.is_decode() {
            AgentError::Protocol(err.to_string())
        } else {
            // reqwest errors can embed the request URL; keep only the
            // top-level description so credentials in query strings can
            // never leak into agent state or toasts.
            AgentError::Network(err.without_url().to_string())
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Timeout => ApiError::timeout("Agent did not respond in time"),
            AgentError::Network(detail) => {
                ApiError::upstream("Agent is unreachable").with_detail(detail)
            }
            AgentError::Auth(_) => ApiError::upstream("Agent rejected the stored credentials"),
            AgentError::Upstream { status, message } => {
                ApiError::upstream(message).with_detail(format!("agent returned status {}", status))
            }
            AgentError::Protocol(detail) => {
                ApiError::upstream("Unexpected response from agent").with_detail(detail)
            }
        }
    }
}

/// Capability set every agent kind must provide.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Lightweight server-info call used for health probing.
    async fn instance(&self) -> Result<Instance, AgentError>;

    /// Fetch the native task list, normalized.
    async fn list_tasks(&self) -> Result<Vec<Task>, AgentError>;

    /// Create a task from a magnet link.
    async fn create_task(&self, spec: &TaskCreation) -> Result<Task, AgentError>;

    async fn pause_task(&self, id: &str) -> Result<(), AgentError>;

    async fn resume_task(&self, id: &str) -> Result<(), AgentError>;

    async fn force_download_task(&self, id: &str) -> Result<(), AgentError>;

    /// Delete a task; `purge` also removes downloaded data.
    async fn delete_task(&self, id: &str, purge: bool) -> Result<(), AgentError>;
}

/// Builds a protocol client for a registered agent.
///
/// A trait so the aggregator and router can be exercised with scripted
/// clients in tests.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, agent: &Agent) -> Result<Box<dyn AgentClient>, AgentError>;
}

/// Production factory: decrypts the stored token and dispatches on kind.
pub struct NativeClientFactory {
    secrets: SecretBox,
    timeout: Duration,
}

impl NativeClientFactory {
    pub fn new(secrets: SecretBox, timeout: Duration) -> Self {
        Self { secrets, timeout }
    }
}

impl ClientFactory for NativeClientFactory {
    fn client_for(&self, agent: &Agent) -> Result<Box<dyn AgentClient>, AgentError> {
        let token = agent
            .decrypt_token(&self.secrets)
            .map_err(|_| AgentError::Auth("stored token cannot be decrypted".to_string()))?;

        match agent.kind {
            AgentKind::Qbittorrent => Ok(Box::new(qbittorrent::QbitClient::new(
                agent.uuid,
                agent.address.clone(),
                token,
                self.timeout,
            ))),
        }
    }
}
