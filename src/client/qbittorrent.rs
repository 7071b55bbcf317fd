//! Client for the qbittorrent agent daemon protocol.
//!
//! Agents expose a small Bearer-token REST surface in front of the qBittorrent
//! instance they wrap: `/v1/instance` for the server-info probe, `/v1/tasks`
//! for the native listing, and `/v1/task/{id}/...` for commands. Task states
//! arrive as raw qBittorrent strings and are normalized here, at the edge.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use super::{AgentClient, AgentError, TaskCreation};
use crate::health::Instance;
use crate::task::{MagnetLink, Task, TaskNetwork, TaskPairs, TaskState};

/// Cap on upstream error bodies quoted back into toasts.
const MAX_UPSTREAM_MESSAGE: usize = 200;

pub struct QbitClient {
    agent_id: Uuid,
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl QbitClient {
    pub fn new(agent_id: Uuid, base_url: String, token: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            agent_id,
            base_url,
            token,
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach auth, send, and turn non-2xx statuses into classified errors.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, AgentError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(AgentError::from_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_UPSTREAM_MESSAGE {
            let mut end = MAX_UPSTREAM_MESSAGE;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        if message.is_empty() {
            message = format!("request failed with status {}", status.as_u16());
        }
        Err(AgentError::from_status(status.as_u16(), message))
    }
}

#[async_trait]
impl AgentClient for QbitClient {
    async fn instance(&self) -> Result<Instance, AgentError> {
        let response = self.send(self.http.get(self.url("/v1/instance"))).await?;
        response
            .json::<Instance>()
            .await
            .map_err(AgentError::from_transport)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, AgentError> {
        let response = self.send(self.http.get(self.url("/v1/tasks"))).await?;
        let items = response
            .json::<Vec<NativeTask>>()
            .await
            .map_err(AgentError::from_transport)?;

        Ok(items
            .into_iter()
            .map(|item| item.into_task(self.agent_id))
            .collect())
    }

    async fn create_task(&self, spec: &TaskCreation) -> Result<Task, AgentError> {
        let response = self
            .send(self.http.post(self.url("/v1/task")).json(spec))
            .await?;
        let item = response
            .json::<NativeTask>()
            .await
            .map_err(AgentError::from_transport)?;
        Ok(item.into_task(self.agent_id))
    }

    async fn pause_task(&self, id: &str) -> Result<(), AgentError> {
        self.send(self.http.post(self.url(&format!("/v1/task/{}/pause", id))))
            .await?;
        Ok(())
    }

    async fn resume_task(&self, id: &str) -> Result<(), AgentError> {
        self.send(self.http.post(self.url(&format!("/v1/task/{}/resume", id))))
            .await?;
        Ok(())
    }

    async fn force_download_task(&self, id: &str) -> Result<(), AgentError> {
        self.send(
            self.http
                .post(self.url(&format!("/v1/task/{}/force_download", id))),
        )
        .await?;
        Ok(())
    }

    async fn delete_task(&self, id: &str, purge: bool) -> Result<(), AgentError> {
        self.send(
            self.http
                .delete(self.url(&format!("/v1/task/{}", id)))
                .query(&[("purge", purge)]),
        )
        .await?;
        Ok(())
    }
}

/// Wire shape of one task as the agent daemon reports it.
#[derive(Debug, Deserialize)]
struct NativeTask {
    #[serde(default)]
    name: String,
    hash: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    ratio: f64,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    popularity: f64,
    #[serde(default)]
    magnet_uri: String,
    #[serde(default)]
    magnet_link: MagnetLink,
    #[serde(default)]
    pairs: TaskPairs,
    #[serde(default)]
    network: TaskNetwork,
    #[serde(default)]
    tags: Vec<String>,
}

impl NativeTask {
    /// Normalize into the unified task model, attributed to its agent.
    /// The native hash doubles as the stable task id.
    fn into_task(self, agent_id: Uuid) -> Task {
        Task {
            id: self.hash.clone(),
            agent_id,
            name: self.name,
            hash: self.hash,
            state: TaskState::from_native(&self.state),
            category: self.category,
            path: self.path,
            size: self.size,
            priority: self.priority,
            ratio: self.ratio,
            progress: self.progress,
            popularity: self.popularity,
            magnet_uri: self.magnet_uri,
            magnet_link: self.magnet_link,
            pairs: self.pairs,
            network: self.network,
            tags: self.tags,
        }
    }
}
