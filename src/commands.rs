//! Routing of mutating commands to a single agent.
//!
//! Every command resolves the target through the registry, refuses agents
//! that are not ACTIVE before any native call goes out, and reports native
//! failures as structured errors the dashboard can toast verbatim. There is
//! exactly one remote side effect per command, so there is nothing to roll
//! back. Commands on the same agent are not serialized against each other —
//! the native API is the ordering authority.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::categories::CategoryStore;
use crate::client::{AgentError, ClientFactory, TaskCreation};
use crate::error::ApiError;
use crate::health::SharedHealthBoard;
use crate::registry::{Agent, AgentStatus, AgentStore};
use crate::task::{parse_magnet_link, Task};

/// Input for task creation, before category defaulting.
#[derive(Debug, Clone)]
pub struct CreateTaskInput {
    pub magnet_uri: String,
    pub category: String,
    pub tags: Vec<String>,
    pub directory: Option<String>,
}

pub struct CommandRouter {
    registry: Arc<AgentStore>,
    health: SharedHealthBoard,
    factory: Arc<dyn ClientFactory>,
    categories: Arc<CategoryStore>,
    timeout: Duration,
}

impl CommandRouter {
    pub fn new(
        registry: Arc<AgentStore>,
        health: SharedHealthBoard,
        factory: Arc<dyn ClientFactory>,
        categories: Arc<CategoryStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            health,
            factory,
            categories,
            timeout,
        }
    }

    /// Resolve an agent and refuse to touch it unless it is ACTIVE.
    /// Failing fast here beats letting the dashboard wait out a doomed
    /// native call against an unreachable agent.
    async fn resolve_active(&self, uuid: Uuid) -> Result<Agent, ApiError> {
        let agent = self
            .registry
            .get(uuid)
            .await
            .ok_or_else(|| ApiError::not_found("Agent not found"))?;

        let status = self.health.status(uuid).await;
        if status != AgentStatus::Active {
            return Err(ApiError::agent_unavailable(format!(
                "Agent {} is not active",
                agent.name
            )));
        }

        Ok(agent)
    }

    /// Run a native call on its own task, bounded by the command deadline.
    /// Spawning means an abandoned HTTP request cannot abort the call
    /// half-way — the native side effect has already been dispatched and
    /// runs to completion either way.
    async fn dispatch<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, AgentError>> + Send + 'static,
    ) -> Result<T, ApiError>
    where
        T: Send + 'static,
    {
        let timeout = self.timeout;
        let handle = tokio::spawn(async move { tokio::time::timeout(timeout, fut).await });
        match handle.await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Err(_)) => Err(ApiError::timeout("Agent did not respond in time")),
            Err(_) => Err(ApiError::internal("Command task failed")),
        }
    }

    /// Create a task on one agent. The save directory falls back to the
    /// category's first configured directory when the request omits it.
    pub async fn create_task(
        &self,
        agent_uuid: Uuid,
        input: CreateTaskInput,
    ) -> Result<Task, ApiError> {
        parse_magnet_link(&input.magnet_uri)
            .map_err(|e| ApiError::validation(format!("Invalid magnet link: {}", e)))?;

        let agent = self.resolve_active(agent_uuid).await?;

        let mut spec = TaskCreation {
            magnet_uri: input.magnet_uri,
            category: input.category,
            tags: input.tags,
            directory: input.directory,
        };

        if spec.directory.is_none() {
            if let Some(category) = self.categories.get_by_name(&spec.category).await {
                spec.directory = category.directories.first().cloned();
                let mut tags = category.default_tags;
                for tag in spec.tags {
                    if !tags.contains(&tag) {
                        tags.push(tag);
                    }
                }
                spec.tags = tags;
            }
        }

        let client = self.factory.client_for(&agent)?;
        let task = self
            .dispatch(async move { client.create_task(&spec).await })
            .await?;
        tracing::info!(agent = %agent.name, hash = %task.hash, "Created task");
        Ok(task)
    }

    pub async fn pause_task(&self, agent_uuid: Uuid, task_id: &str) -> Result<(), ApiError> {
        let agent = self.resolve_active(agent_uuid).await?;
        let client = self.factory.client_for(&agent)?;
        let id = task_id.to_string();
        self.dispatch(async move { client.pause_task(&id).await })
            .await
    }

    pub async fn resume_task(&self, agent_uuid: Uuid, task_id: &str) -> Result<(), ApiError> {
        let agent = self.resolve_active(agent_uuid).await?;
        let client = self.factory.client_for(&agent)?;
        let id = task_id.to_string();
        self.dispatch(async move { client.resume_task(&id).await })
            .await
    }

    pub async fn force_download_task(
        &self,
        agent_uuid: Uuid,
        task_id: &str,
    ) -> Result<(), ApiError> {
        let agent = self.resolve_active(agent_uuid).await?;
        let client = self.factory.client_for(&agent)?;
        let id = task_id.to_string();
        self.dispatch(async move { client.force_download_task(&id).await })
            .await
    }

    pub async fn delete_task(
        &self,
        agent_uuid: Uuid,
        task_id: &str,
        purge: bool,
    ) -> Result<(), ApiError> {
        let agent = self.resolve_active(agent_uuid).await?;
        let client = self.factory.client_for(&agent)?;
        let id = task_id.to_string();
        self.dispatch(async move { client.delete_task(&id, purge).await })
            .await
    }

    /// Delete a task identified only by its hash: scan ACTIVE agents for the
    /// owner, then issue the delete there. Task ids are agent-scoped hashes,
    /// so the first owner found is the owner.
    pub async fn delete_task_anywhere(&self, task_id: &str, purge: bool) -> Result<(), ApiError> {
        for agent in self.registry.list().await {
            if self.health.status(agent.uuid).await != AgentStatus::Active {
                continue;
            }

            let client = match self.factory.client_for(&agent) {
                Ok(client) => client,
                Err(err) => {
                    tracing::warn!(agent = %agent.name, "Skipping agent during delete: {}", err);
                    continue;
                }
            };

            let tasks = match tokio::time::timeout(self.timeout, client.list_tasks()).await {
                Ok(Ok(tasks)) => tasks,
                Ok(Err(err)) => {
                    tracing::warn!(agent = %agent.name, "Listing failed during delete: {}", err);
                    continue;
                }
                Err(_) => {
                    tracing::warn!(agent = %agent.name, "Listing timed out during delete");
                    continue;
                }
            };

            if tasks.iter().any(|t| t.id == task_id) {
                let id = task_id.to_string();
                return self
                    .dispatch(async move { client.delete_task(&id, purge).await })
                    .await;
            }
        }

        Err(ApiError::not_found("Task not found"))
    }
}
