//! Periodic health probing of registered agents.
//!
//! Every agent gets its own probe loop, so a hung or slow agent never delays
//! the checks of the others. A loop reads the registry on each pass, which
//! makes address/token updates take effect on the very next probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::{AgentError, ClientFactory};
use crate::health::{Instance, SharedHealthBoard};
use crate::registry::{Agent, AgentStore};

/// One-shot probe used when validating connectivity before an agent record
/// is created or updated.
pub async fn probe_agent(
    factory: &dyn ClientFactory,
    agent: &Agent,
) -> Result<Instance, AgentError> {
    factory.client_for(agent)?.instance().await
}

/// Owns the per-agent probe loops.
pub struct Prober {
    registry: Arc<AgentStore>,
    health: SharedHealthBoard,
    factory: Arc<dyn ClientFactory>,
    interval: Duration,
    loops: RwLock<HashMap<Uuid, JoinHandle<()>>>,
}

impl Prober {
    pub fn new(
        registry: Arc<AgentStore>,
        health: SharedHealthBoard,
        factory: Arc<dyn ClientFactory>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            health,
            factory,
            interval,
            loops: RwLock::new(HashMap::new()),
        })
    }

    /// Start probe loops for every agent currently registered.
    pub async fn start(self: &Arc<Self>) {
        for agent in self.registry.list().await {
            self.watch(agent.uuid).await;
        }
    }

    /// Start (or restart) the probe loop for one agent.
    pub async fn watch(self: &Arc<Self>, uuid: Uuid) {
        let mut loops = self.loops.write().await;
        if let Some(old) = loops.remove(&uuid) {
            old.abort();
        }

        let prober = Arc::clone(self);
        loops.insert(
            uuid,
            tokio::spawn(async move {
                prober.probe_loop(uuid).await;
            }),
        );
    }

    /// Stop probing a deleted agent and drop its health entry.
    pub async fn unwatch(&self, uuid: Uuid) {
        if let Some(handle) = self.loops.write().await.remove(&uuid) {
            handle.abort();
        }
        self.health.remove(uuid).await;
    }

    async fn probe_loop(self: Arc<Self>, uuid: Uuid) {
        loop {
            let Some(agent) = self.registry.get(uuid).await else {
                // Agent was deleted; the loop dies with it.
                break;
            };

            let delay = self.probe_and_record(&agent).await;
            tokio::time::sleep(delay).await;
        }

        self.health.remove(uuid).await;
    }

    /// Run one probe and record its outcome. Returns how long to wait before
    /// the next attempt: transient failures retry on the backoff schedule
    /// until the status flips, everything else waits a full interval.
    pub(crate) async fn probe_and_record(&self, agent: &Agent) -> Duration {
        match probe_agent(self.factory.as_ref(), agent).await {
            Ok(instance) => {
                tracing::debug!(agent = %agent.name, "Probe succeeded");
                self.health.record_active(agent.uuid, instance).await;
                self.interval
            }
            Err(err) if err.is_transient() => {
                let outcome = self
                    .health
                    .record_unreachable(agent.uuid, err.to_string())
                    .await;
                if outcome.flipped_inactive {
                    tracing::warn!(agent = %agent.name, "Agent unreachable, marked INACTIVE");
                    self.interval
                } else {
                    tracing::debug!(
                        agent = %agent.name,
                        retry_in = ?outcome.retry_after,
                        "Probe failed, retrying before flipping status"
                    );
                    outcome.retry_after
                }
            }
            Err(AgentError::Auth(detail)) => {
                // Bad credentials will not fix themselves — surface now.
                tracing::warn!(agent = %agent.name, "Agent rejected credentials");
                self.health
                    .record_auth_failure(
                        agent.uuid,
                        format!("authentication rejected: {}", detail),
                    )
                    .await;
                self.interval
            }
            Err(err) => {
                tracing::warn!(agent = %agent.name, "Probe failed: {}", err);
                self.health.record_errored(agent.uuid, err.to_string()).await;
                self.interval
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AgentClient, TaskCreation};
    use crate::crypto::{self, SecretBox};
    use crate::health::HealthBoard;
    use crate::registry::{AgentStatus, NewAgent};
    use crate::task::Task;
    use async_trait::async_trait;

    /// Client whose calls resolve to a preprogrammed outcome.
    struct ScriptedClient {
        outcome: Result<Instance, AgentError>,
    }

    #[async_trait]
    impl AgentClient for ScriptedClient {
        async fn instance(&self) -> Result<Instance, AgentError> {
            match &self.outcome {
                Ok(instance) => Ok(instance.clone()),
                Err(AgentError::Timeout) => Err(AgentError::Timeout),
                Err(AgentError::Network(m)) => Err(AgentError::Network(m.clone())),
                Err(AgentError::Auth(m)) => Err(AgentError::Auth(m.clone())),
                Err(AgentError::Upstream { status, message }) => Err(AgentError::Upstream {
                    status: *status,
                    message: message.clone(),
                }),
                Err(AgentError::Protocol(m)) => Err(AgentError::Protocol(m.clone())),
            }
        }

        async fn list_tasks(&self) -> Result<Vec<Task>, AgentError> {
            Ok(Vec::new())
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

    struct ScriptedFactory {
        outcome: fn() -> Result<Instance, AgentError>,
    }

    impl ClientFactory for ScriptedFactory {
        fn client_for(&self, _agent: &Agent) -> Result<Box<dyn AgentClient>, AgentError> {
            Ok(Box::new(ScriptedClient {
                outcome: (self.outcome)(),
            }))
        }
    }

    async fn prober_with(
        dir: &tempfile::TempDir,
        outcome: fn() -> Result<Instance, AgentError>,
    ) -> (Arc<Prober>, Agent, SharedHealthBoard) {
        let secrets = SecretBox::new(crypto::generate_key());
        let registry = Arc::new(
            AgentStore::new(dir.path().join("agents.json"), secrets).await,
        );
        let agent = registry
            .create(NewAgent {
                name: "box".to_string(),
                kind: "qbittorrent".to_string(),
                address: "http://10.0.0.9:9090".to_string(),
                token: "tok".to_string(),
                icon: String::new(),
                color: String::new(),
            })
            .await
            .unwrap();

        let health: SharedHealthBoard = Arc::new(HealthBoard::new());
        let prober = Prober::new(
            Arc::clone(&registry),
            Arc::clone(&health),
            Arc::new(ScriptedFactory { outcome }),
            Duration::from_secs(30),
        );
        (prober, agent, health)
    }

    #[tokio::test]
    async fn successful_probe_marks_active() {
        let dir = tempfile::tempdir().unwrap();
        let (prober, agent, health) = prober_with(&dir, || Ok(Instance::default())).await;

        let delay = prober.probe_and_record(&agent).await;
        assert_eq!(health.status(agent.uuid).await, AgentStatus::Active);
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn timeout_never_marks_errored() {
        let dir = tempfile::tempdir().unwrap();
        let (prober, agent, health) = prober_with(&dir, || Err(AgentError::Timeout)).await;

        // Repeated timeouts walk through backoff and end INACTIVE.
        for _ in 0..4 {
            prober.probe_and_record(&agent).await;
        }

        let snapshot = health.snapshot(agent.uuid).await;
        assert_eq!(snapshot.status, AgentStatus::Inactive);
        assert!(snapshot.instance.is_none());
    }

    #[tokio::test]
    async fn transient_failures_back_off_before_flipping() {
        let dir = tempfile::tempdir().unwrap();
        let (prober, agent, health) =
            prober_with(&dir, || Err(AgentError::Network("refused".to_string()))).await;
        health.record_active(agent.uuid, Instance::default()).await;

        let delay = prober.probe_and_record(&agent).await;
        // Status survives the first failure and the retry comes sooner
        // than the regular interval.
        assert_eq!(health.status(agent.uuid).await, AgentStatus::Active);
        assert!(delay < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn auth_rejection_marks_errored_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (prober, agent, health) =
            prober_with(&dir, || Err(AgentError::Auth("bad token".to_string()))).await;

        let delay = prober.probe_and_record(&agent).await;
        let snapshot = health.snapshot(agent.uuid).await;
        assert_eq!(snapshot.status, AgentStatus::Errored);
        assert!(snapshot.last_error.unwrap().contains("authentication rejected"));
        // No backoff for credential problems.
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn upstream_failure_marks_errored() {
        let dir = tempfile::tempdir().unwrap();
        let (prober, agent, health) = prober_with(&dir, || {
            Err(AgentError::Upstream {
                status: 500,
                message: "database locked".to_string(),
            })
        })
        .await;

        prober.probe_and_record(&agent).await;
        assert_eq!(health.status(agent.uuid).await, AgentStatus::Errored);
    }

    #[tokio::test]
    async fn unwatch_drops_health_state() {
        let dir = tempfile::tempdir().unwrap();
        let (prober, agent, health) = prober_with(&dir, || Ok(Instance::default())).await;

        prober.probe_and_record(&agent).await;
        prober.unwatch(agent.uuid).await;
        assert!(health.active_agents().await.is_empty());
    }
}
