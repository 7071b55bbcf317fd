//! Runtime health overlay for registered agents.
//!
//! The registry persists configuration; this board holds what probing
//! learned: status, last error, and the latest instance snapshot. Probers
//! write it, API responses and the aggregator read it. Entries disappear
//! with their agent, so tasks of a deleted agent vanish from the next cycle
//! without any cleanup pass.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::registry::AgentStatus;

/// Application block of an instance snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceApplication {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub api_version: String,
}

/// Server block of an instance snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceServer {
    #[serde(default)]
    pub free_space_on_disk: i64,
}

/// Transfer totals block of an instance snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceTransfer {
    #[serde(default)]
    pub all_time_downloaded: i64,
    #[serde(default)]
    pub all_time_uploaded: i64,
    #[serde(default)]
    pub global_ratio: f64,
    #[serde(default)]
    pub last_external_address_v4: String,
    #[serde(default)]
    pub last_external_address_v6: String,
}

/// Snapshot of one agent's instance, replaced wholesale on every successful
/// probe. Stale the moment the agent stops being ACTIVE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub application: InstanceApplication,
    #[serde(default)]
    pub server: InstanceServer,
    #[serde(default)]
    pub transfer: InstanceTransfer,
}

/// Live health state for a single agent.
#[derive(Debug, Clone)]
pub struct AgentHealth {
    pub status: AgentStatus,
    pub last_error: Option<String>,
    pub instance: Option<Instance>,
    pub consecutive_failures: u32,
    pub last_probe_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for AgentHealth {
    fn default() -> Self {
        Self {
            // Not yet probed: unreachable until proven otherwise.
            status: AgentStatus::Inactive,
            last_error: None,
            instance: None,
            consecutive_failures: 0,
            last_probe_at: None,
        }
    }
}

/// Backoff policy for transient probe failures.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first transient failure.
    pub base_delay: Duration,
    /// Cap for the retry delay.
    pub max_delay: Duration,
    /// Multiplier per consecutive failure.
    pub multiplier: f64,
    /// Transient failures tolerated before the agent flips to INACTIVE.
    /// A single dropped packet must not flap the status.
    pub flip_threshold: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            flip_threshold: 3,
        }
    }
}

impl BackoffConfig {
    /// Retry delay for the given number of consecutive failures.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.saturating_sub(1);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Shared board of per-agent health, keyed by agent uuid.
#[derive(Debug, Default)]
pub struct HealthBoard {
    agents: RwLock<HashMap<Uuid, AgentHealth>>,
    backoff: BackoffConfig,
}

/// Outcome of recording an unreachable probe: whether the status flipped
/// and how long to wait before the next attempt.
#[derive(Debug, Clone, Copy)]
pub struct UnreachableOutcome {
    pub flipped_inactive: bool,
    pub retry_after: Duration,
}

impl HealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(backoff: BackoffConfig) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            backoff,
        }
    }

    /// Current health for an agent (default entry when never probed).
    pub async fn snapshot(&self, uuid: Uuid) -> AgentHealth {
        self.agents.read().await.get(&uuid).cloned().unwrap_or_default()
    }

    pub async fn status(&self, uuid: Uuid) -> AgentStatus {
        self.snapshot(uuid).await.status
    }

    /// Successful probe: ACTIVE, fresh snapshot, error cleared.
    pub async fn record_active(&self, uuid: Uuid, instance: Instance) {
        let mut agents = self.agents.write().await;
        let health = agents.entry(uuid).or_default();
        health.status = AgentStatus::Active;
        health.instance = Some(instance);
        health.last_error = None;
        health.consecutive_failures = 0;
        health.last_probe_at = Some(chrono::Utc::now());
    }

    /// Credential rejection: the configuration is wrong, retrying will not
    /// help — flip to ERRORED immediately, no backoff.
    pub async fn record_auth_failure(&self, uuid: Uuid, message: String) {
        self.record_errored(uuid, message).await;
    }

    /// Non-auth upstream failure that is not a connectivity problem
    /// (unexpected payload, native 5xx on the info call).
    pub async fn record_errored(&self, uuid: Uuid, message: String) {
        let mut agents = self.agents.write().await;
        let health = agents.entry(uuid).or_default();
        health.status = AgentStatus::Errored;
        health.instance = None;
        health.last_error = Some(message);
        health.consecutive_failures = 0;
        health.last_probe_at = Some(chrono::Utc::now());
    }

    /// Network/timeout failure. The previous status survives until the
    /// failure count reaches the flip threshold, then the agent becomes
    /// INACTIVE (never ERRORED — the configuration may be fine).
    pub async fn record_unreachable(&self, uuid: Uuid, message: String) -> UnreachableOutcome {
        let mut agents = self.agents.write().await;
        let health = agents.entry(uuid).or_default();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_probe_at = Some(chrono::Utc::now());

        let flipped = health.consecutive_failures >= self.backoff.flip_threshold;
        if flipped {
            health.status = AgentStatus::Inactive;
            health.instance = None;
            health.last_error = Some(message);
        }

        UnreachableOutcome {
            flipped_inactive: flipped,
            retry_after: self.backoff.delay_for(health.consecutive_failures),
        }
    }

    /// Drop the entry for a deleted agent.
    pub async fn remove(&self, uuid: Uuid) {
        self.agents.write().await.remove(&uuid);
    }

    /// Uuids currently ACTIVE, in no particular order.
    pub async fn active_agents(&self) -> Vec<Uuid> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|(_, h)| h.status == AgentStatus::Active)
            .map(|(&uuid, _)| uuid)
            .collect()
    }
}

/// Shared board type.
pub type SharedHealthBoard = Arc<HealthBoard>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance() -> Instance {
        Instance {
            application: InstanceApplication {
                version: "5.0.2".to_string(),
                api_version: "2.11".to_string(),
            },
            server: InstanceServer {
                free_space_on_disk: 42_000_000_000,
            },
            transfer: InstanceTransfer {
                all_time_downloaded: 123,
                all_time_uploaded: 456,
                global_ratio: 3.7,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn unprobed_agents_default_to_inactive() {
        let board = HealthBoard::new();
        let health = board.snapshot(Uuid::new_v4()).await;
        assert_eq!(health.status, AgentStatus::Inactive);
        assert!(health.instance.is_none());
    }

    #[tokio::test]
    async fn successful_probe_activates_and_replaces_snapshot() {
        let board = HealthBoard::new();
        let uuid = Uuid::new_v4();

        board.record_active(uuid, sample_instance()).await;
        let health = board.snapshot(uuid).await;
        assert_eq!(health.status, AgentStatus::Active);
        assert_eq!(health.instance.as_ref().unwrap().application.version, "5.0.2");

        // A later probe replaces the snapshot wholesale, not merged.
        let mut next = sample_instance();
        next.application.version = "5.1.0".to_string();
        next.transfer = InstanceTransfer::default();
        board.record_active(uuid, next.clone()).await;
        assert_eq!(board.snapshot(uuid).await.instance.unwrap(), next);
    }

    #[tokio::test]
    async fn auth_rejection_is_errored_never_inactive() {
        let board = HealthBoard::new();
        let uuid = Uuid::new_v4();
        board.record_active(uuid, sample_instance()).await;

        board
            .record_auth_failure(uuid, "authentication rejected".to_string())
            .await;

        let health = board.snapshot(uuid).await;
        assert_eq!(health.status, AgentStatus::Errored);
        assert!(health.instance.is_none());
        assert_eq!(health.last_error.as_deref(), Some("authentication rejected"));
    }

    #[tokio::test]
    async fn timeouts_flip_to_inactive_only_after_threshold() {
        let board = HealthBoard::with_backoff(BackoffConfig {
            flip_threshold: 3,
            ..Default::default()
        });
        let uuid = Uuid::new_v4();
        board.record_active(uuid, sample_instance()).await;

        let first = board.record_unreachable(uuid, "timeout".to_string()).await;
        assert!(!first.flipped_inactive);
        assert_eq!(board.status(uuid).await, AgentStatus::Active);

        let second = board.record_unreachable(uuid, "timeout".to_string()).await;
        assert!(!second.flipped_inactive);

        let third = board.record_unreachable(uuid, "timeout".to_string()).await;
        assert!(third.flipped_inactive);
        // INACTIVE, never ERRORED, for connectivity failures.
        assert_eq!(board.status(uuid).await, AgentStatus::Inactive);
    }

    #[tokio::test]
    async fn recovery_resets_failure_count() {
        let board = HealthBoard::new();
        let uuid = Uuid::new_v4();

        board.record_unreachable(uuid, "timeout".to_string()).await;
        board.record_unreachable(uuid, "timeout".to_string()).await;
        board.record_active(uuid, sample_instance()).await;

        assert_eq!(board.snapshot(uuid).await.consecutive_failures, 0);
        assert_eq!(board.status(uuid).await, AgentStatus::Active);
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(20), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn removed_agents_disappear_from_active_set() {
        let board = HealthBoard::new();
        let uuid = Uuid::new_v4();
        board.record_active(uuid, sample_instance()).await;
        assert_eq!(board.active_agents().await, vec![uuid]);

        board.remove(uuid).await;
        assert!(board.active_agents().await.is_empty());
        assert_eq!(board.status(uuid).await, AgentStatus::Inactive);
    }
}
