//! Fan-out task aggregation across ACTIVE agents.
//!
//! Pull model: every dashboard poll triggers one cycle. Agents are queried
//! concurrently with a per-call deadline; an agent that times out or fails
//! contributes zero tasks for the cycle but never fails the response. The
//! deadline is the backpressure valve — a hung agent must not stall a poll
//! loop that fires every few seconds.

use std::sync::Arc;
use std::time::Duration;

use crate::client::ClientFactory;
use crate::error::ApiError;
use crate::health::SharedHealthBoard;
use crate::registry::{Agent, AgentStatus, AgentStore};
use crate::task::Task;

pub struct Aggregator {
    registry: Arc<AgentStore>,
    health: SharedHealthBoard,
    factory: Arc<dyn ClientFactory>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(
        registry: Arc<AgentStore>,
        health: SharedHealthBoard,
        factory: Arc<dyn ClientFactory>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            health,
            factory,
            timeout,
        }
    }

    /// Run one aggregation cycle over every ACTIVE agent.
    ///
    /// Always returns best-effort partial results; per-agent failures are
    /// logged and show up only as missing tasks.
    pub async fn collect_all(&self) -> Vec<Task> {
        let agents = self.registry.list().await;

        let mut handles = Vec::with_capacity(agents.len());
        for agent in agents {
            if self.health.status(agent.uuid).await != AgentStatus::Active {
                continue;
            }

            let factory = Arc::clone(&self.factory);
            let timeout = self.timeout;
            handles.push(tokio::spawn(async move {
                fetch_agent_tasks(factory.as_ref(), &agent, timeout).await
            }));
        }

        let mut tasks = Vec::new();
        for result in futures::future::join_all(handles).await {
            if let Ok(mut agent_tasks) = result {
                tasks.append(&mut agent_tasks);
            }
        }
        tasks
    }

    /// Fetch one agent's tasks. Unlike the aggregate cycle, a single-agent
    /// listing surfaces the failure to the caller.
    pub async fn collect_one(&self, agent: &Agent) -> Result<Vec<Task>, ApiError> {
        if self.health.status(agent.uuid).await != AgentStatus::Active {
            return Err(ApiError::agent_unavailable(format!(
                "Agent {} is not active",
                agent.name
            )));
        }

        let client = self.factory.client_for(agent)?;
        match tokio::time::timeout(self.timeout, client.list_tasks()).await {
            Ok(Ok(tasks)) => Ok(tasks),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(ApiError::timeout("Agent did not respond in time")),
        }
    }
}

async fn fetch_agent_tasks(
    factory: &dyn ClientFactory,
    agent: &Agent,
    timeout: Duration,
) -> Vec<Task> {
    let client = match factory.client_for(agent) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(agent = %agent.name, "Skipping agent in aggregation: {}", err);
            return Vec::new();
        }
    };

    match tokio::time::timeout(timeout, client.list_tasks()).await {
        Ok(Ok(tasks)) => tasks,
        Ok(Err(err)) => {
            tracing::warn!(agent = %agent.name, "Task listing failed: {}", err);
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(agent = %agent.name, "Task listing timed out");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AgentClient, AgentError, TaskCreation};
    use crate::crypto::{self, SecretBox};
    use crate::health::{HealthBoard, Instance};
    use crate::registry::NewAgent;
    use crate::task::{MagnetLink, TaskNetwork, TaskPairs, TaskState};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Instant;
    use uuid::Uuid;

    fn make_task(hash: &str, agent_id: Uuid) -> Task {
        Task {
            id: hash.to_string(),
            agent_id,
            name: format!("task-{}", hash),
            hash: hash.to_string(),
            state: TaskState::Downloading,
            category: String::new(),
            path: String::new(),
            size: 0,
            priority: 0,
            ratio: 0.0,
            progress: 0.0,
            popularity: 0.0,
            magnet_uri: String::new(),
            magnet_link: MagnetLink::default(),
            pairs: TaskPairs::default(),
            network: TaskNetwork::default(),
            tags: Vec::new(),
        }
    }

    #[derive(Clone)]
    enum Behavior {
        Tasks(Vec<Task>),
        Hang,
        Fail,
    }

    struct MockClient {
        behavior: Behavior,
    }

    #[async_trait]
    impl AgentClient for MockClient {
        async fn instance(&self) -> Result<Instance, AgentError> {
            Ok(Instance::default())
        }

        async fn list_tasks(&self) -> Result<Vec<Task>, AgentError> {
            match &self.behavior {
                Behavior::Tasks(tasks) => Ok(tasks.clone()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
                Behavior::Fail => Err(AgentError::Network("connection reset".to_string())),
            }
        }

        async fn create_task(&self, _spec: &TaskCreation) -> Result<Task, AgentError> {
            Err(AgentError::Protocol("not scripted".to_string()))
        }

        async fn pause_task(&self, _id: &str) -> Result<(), AgentError> {
            Ok(())
        }

        async fn resume_task(&self, _id: &str) -> Result<(), AgentError> {
            Ok(())
        }

        async fn force_download_task(&self, _id: &str) -> Result<(), AgentError> {
            Ok(())
        }

        async fn delete_task(&self, _id: &str, _purge: bool) -> Result<(), AgentError> {
            Ok(())
        }
    }

    struct MockFactory {
        behaviors: HashMap<Uuid, Behavior>,
    }

    impl ClientFactory for MockFactory {
        fn client_for(&self, agent: &Agent) -> Result<Box<dyn AgentClient>, AgentError> {
            let behavior = self
                .behaviors
                .get(&agent.uuid)
                .cloned()
                .unwrap_or(Behavior::Fail);
            Ok(Box::new(MockClient { behavior }))
        }
    }

    struct Fixture {
        registry: Arc<AgentStore>,
        health: SharedHealthBoard,
        agents: Vec<Agent>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(names: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let secrets = SecretBox::new(crypto::generate_key());
        let registry = Arc::new(
            AgentStore::new(dir.path().join("agents.json"), secrets).await,
        );
        let health: SharedHealthBoard = Arc::new(HealthBoard::new());

        let mut agents = Vec::new();
        for name in names {
            let agent = registry
                .create(NewAgent {
                    name: name.to_string(),
                    kind: "qbittorrent".to_string(),
                    address: "http://10.0.0.1:9090".to_string(),
                    token: "tok".to_string(),
                    icon: String::new(),
                    color: String::new(),
                })
                .await
                .unwrap();
            health.record_active(agent.uuid, Instance::default()).await;
            agents.push(agent);
        }

        Fixture {
            registry,
            health,
            agents,
            _dir: dir,
        }
    }

    fn aggregator(fixture: &Fixture, behaviors: HashMap<Uuid, Behavior>) -> Aggregator {
        Aggregator::new(
            Arc::clone(&fixture.registry),
            Arc::clone(&fixture.health),
            Arc::new(MockFactory { behaviors }),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn merges_tasks_from_all_active_agents() {
        let fx = fixture(&["alpha", "beta"]).await;
        let mut behaviors = HashMap::new();
        behaviors.insert(
            fx.agents[0].uuid,
            Behavior::Tasks(vec![make_task("aaa", fx.agents[0].uuid)]),
        );
        behaviors.insert(
            fx.agents[1].uuid,
            Behavior::Tasks(vec![
                make_task("bbb", fx.agents[1].uuid),
                make_task("ccc", fx.agents[1].uuid),
            ]),
        );

        let tasks = aggregator(&fx, behaviors).collect_all().await;
        assert_eq!(tasks.len(), 3);
        // Every task is attributed to its originating agent.
        assert!(tasks.iter().any(|t| t.agent_id == fx.agents[0].uuid));
        assert_eq!(
            tasks.iter().filter(|t| t.agent_id == fx.agents[1].uuid).count(),
            2
        );
    }

    #[tokio::test]
    async fn slow_agent_does_not_block_the_cycle() {
        let fx = fixture(&["alpha", "beta", "gamma"]).await;
        let mut behaviors = HashMap::new();
        behaviors.insert(
            fx.agents[0].uuid,
            Behavior::Tasks(vec![make_task("aaa", fx.agents[0].uuid)]),
        );
        behaviors.insert(fx.agents[1].uuid, Behavior::Hang);
        behaviors.insert(
            fx.agents[2].uuid,
            Behavior::Tasks(vec![make_task("ccc", fx.agents[2].uuid)]),
        );

        let started = Instant::now();
        let tasks = aggregator(&fx, behaviors).collect_all().await;

        // The hung agent is cut off at the per-call deadline and the two
        // healthy agents' tasks come back.
        assert_eq!(tasks.len(), 2);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn failing_agent_contributes_nothing() {
        let fx = fixture(&["alpha", "beta"]).await;
        let mut behaviors = HashMap::new();
        behaviors.insert(
            fx.agents[0].uuid,
            Behavior::Tasks(vec![make_task("aaa", fx.agents[0].uuid)]),
        );
        behaviors.insert(fx.agents[1].uuid, Behavior::Fail);

        let tasks = aggregator(&fx, behaviors).collect_all().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].hash, "aaa");
    }

    #[tokio::test]
    async fn non_active_agents_are_skipped() {
        let fx = fixture(&["alpha", "beta"]).await;
        fx.health
            .record_auth_failure(fx.agents[1].uuid, "bad token".to_string())
            .await;

        let mut behaviors = HashMap::new();
        behaviors.insert(
            fx.agents[0].uuid,
            Behavior::Tasks(vec![make_task("aaa", fx.agents[0].uuid)]),
        );
        behaviors.insert(
            fx.agents[1].uuid,
            Behavior::Tasks(vec![make_task("bbb", fx.agents[1].uuid)]),
        );

        let tasks = aggregator(&fx, behaviors).collect_all().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].agent_id, fx.agents[0].uuid);
    }

    #[tokio::test]
    async fn deleted_agent_tasks_disappear_next_cycle() {
        let fx = fixture(&["alpha", "beta"]).await;
        let mut behaviors = HashMap::new();
        behaviors.insert(
            fx.agents[0].uuid,
            Behavior::Tasks(vec![make_task("aaa", fx.agents[0].uuid)]),
        );
        behaviors.insert(
            fx.agents[1].uuid,
            Behavior::Tasks(vec![make_task("bbb", fx.agents[1].uuid)]),
        );
        let agg = aggregator(&fx, behaviors);

        assert_eq!(agg.collect_all().await.len(), 2);

        fx.registry.delete(fx.agents[1].uuid).await;
        fx.health.remove(fx.agents[1].uuid).await;

        let tasks = agg.collect_all().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].agent_id, fx.agents[0].uuid);
    }

    #[tokio::test]
    async fn single_agent_listing_requires_active_status() {
        let fx = fixture(&["alpha"]).await;
        fx.health.remove(fx.agents[0].uuid).await;

        let agg = aggregator(&fx, HashMap::new());
        let err = agg.collect_one(&fx.agents[0]).await.unwrap_err();
        assert_eq!(err.status_code, 503);
    }
}
