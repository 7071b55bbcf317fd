//! Agent registry: configuration records for every registered torrent-client
//! endpoint.
//!
//! The store is the single source of truth for address + credential. Probers,
//! the aggregator and the command router read it on every call, so CRUD
//! changes are picked up without a restart. Live health (status, last error,
//! instance snapshot) is not persisted — it lives in [`crate::health`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::crypto::{CryptoError, SecretBox};
use crate::error::ApiError;

/// Health state of a registered agent.
///
/// `Inactive` means "currently unreachable"; `Errored` means "configuration
/// is wrong" (bad credentials, broken address). The prober is the only
/// writer of this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Active,
    Errored,
    Inactive,
}

/// Supported agent kinds. Adding a kind means implementing
/// [`crate::client::AgentClient`] for it, not branching in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Qbittorrent,
}

impl AgentKind {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "qbittorrent" => Some(Self::Qbittorrent),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Qbittorrent => "qbittorrent",
        }
    }
}

/// Persisted agent record. The token field always holds ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub uuid: Uuid,
    pub name: String,
    pub kind: AgentKind,
    pub address: String,
    /// AES-GCM encrypted auth token; never serialized into API responses.
    pub token: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Agent {
    /// Decrypt the stored auth token for a native call.
    pub fn decrypt_token(&self, secrets: &SecretBox) -> Result<String, CryptoError> {
        secrets.decrypt(&self.token)
    }
}

/// Input for agent registration.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub kind: String,
    pub address: String,
    pub token: String,
    pub icon: String,
    pub color: String,
}

/// Partial update; `None` means "keep current". The token, when present, is
/// overwritten wholesale (never merged).
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub token: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent name cannot be empty")]
    EmptyName,

    #[error("agent token cannot be empty")]
    EmptyToken,

    #[error("invalid agent address: {0}")]
    InvalidAddress(String),

    #[error("unknown agent type: {0}")]
    UnknownKind(String),

    #[error("an agent named {0} already exists")]
    DuplicateName(String),

    #[error("agent not found")]
    NotFound,

    #[error("failed to encrypt token")]
    Crypto(#[from] CryptoError),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound => ApiError::not_found("Agent not found"),
            RegistryError::DuplicateName(_) => ApiError::conflict("Agent already exists"),
            RegistryError::Crypto(_) => ApiError::internal("Failed to store agent credentials"),
            other => ApiError::validation(other.to_string()),
        }
    }
}

/// Validate and canonicalize an agent address: absolute http(s) URL with a
/// host, trailing slash trimmed.
pub fn canonicalize_address(address: &str) -> Result<String, RegistryError> {
    let url = url::Url::parse(address.trim())
        .map_err(|e| RegistryError::InvalidAddress(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(RegistryError::InvalidAddress(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(RegistryError::InvalidAddress("missing host".to_string()));
    }

    Ok(url.to_string().trim_end_matches('/').to_string())
}

/// Disk-backed store of agent records.
#[derive(Debug)]
pub struct AgentStore {
    agents: RwLock<HashMap<Uuid, Agent>>,
    storage_path: PathBuf,
    secrets: SecretBox,
}

impl AgentStore {
    pub async fn new(storage_path: PathBuf, secrets: SecretBox) -> Self {
        let store = Self {
            agents: RwLock::new(HashMap::new()),
            storage_path,
            secrets,
        };

        match store.load_from_disk() {
            Ok(loaded) => {
                let mut agents = store.agents.write().await;
                *agents = loaded;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // First start — the file is created on the first write.
            }
            Err(e) => {
                tracing::error!(
                    path = %store.storage_path.display(),
                    "Failed to load agent registry: {}",
                    e
                );
            }
        }

        store
    }

    pub fn secrets(&self) -> &SecretBox {
        &self.secrets
    }

    fn load_from_disk(&self) -> Result<HashMap<Uuid, Agent>, std::io::Error> {
        let contents = std::fs::read_to_string(&self.storage_path)?;
        let agents: Vec<Agent> = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(agents.into_iter().map(|a| (a.uuid, a)).collect())
    }

    /// Write to a temp file, then rename. Called while the caller still
    /// holds the write lock so concurrent CRUD cannot interleave saves.
    fn save_to_disk(&self, agents: &HashMap<Uuid, Agent>) -> Result<(), std::io::Error> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut list: Vec<&Agent> = agents.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        let contents = serde_json::to_string_pretty(&list)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp_path = self.storage_path.with_extension("tmp");
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &self.storage_path)?;
        Ok(())
    }

    /// List all agents, sorted by name.
    pub async fn list(&self) -> Vec<Agent> {
        let agents = self.agents.read().await;
        let mut list: Vec<_> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn get(&self, uuid: Uuid) -> Option<Agent> {
        self.agents.read().await.get(&uuid).cloned()
    }

    /// Build a validated, unregistered record from creation input. Used to
    /// probe connectivity before anything is persisted.
    pub fn candidate(&self, input: &NewAgent) -> Result<Agent, RegistryError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if input.token.trim().is_empty() {
            return Err(RegistryError::EmptyToken);
        }
        let kind = AgentKind::from_id(&input.kind)
            .ok_or_else(|| RegistryError::UnknownKind(input.kind.clone()))?;
        let address = canonicalize_address(&input.address)?;

        let now = chrono::Utc::now();
        Ok(Agent {
            uuid: Uuid::new_v4(),
            name,
            kind,
            address,
            token: self.secrets.encrypt(input.token.trim())?,
            icon: input.icon.clone(),
            color: input.color.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Register a new agent. Fails with a validation error before anything
    /// is written when the input is malformed.
    pub async fn create(&self, input: NewAgent) -> Result<Agent, RegistryError> {
        let agent = self.candidate(&input)?;

        let mut agents = self.agents.write().await;
        if agents.values().any(|a| a.name == agent.name) {
            return Err(RegistryError::DuplicateName(agent.name));
        }
        agents.insert(agent.uuid, agent.clone());

        if let Err(e) = self.save_to_disk(&agents) {
            tracing::error!("Failed to save agent registry: {}", e);
        }

        tracing::info!(agent = %agent.name, uuid = %agent.uuid, "Registered agent");
        Ok(agent)
    }

    /// Apply a partial update. Omitted fields keep their current value.
    pub async fn update(&self, uuid: Uuid, patch: AgentPatch) -> Result<Agent, RegistryError> {
        let mut agents = self.agents.write().await;

        if let Some(name) = patch.name.as_deref() {
            let name = name.trim();
            if name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if agents.values().any(|a| a.uuid != uuid && a.name == name) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
        }

        let address = match patch.address.as_deref() {
            Some(addr) => Some(canonicalize_address(addr)?),
            None => None,
        };

        let token = match patch.token.as_deref() {
            Some(token) => {
                if token.trim().is_empty() {
                    return Err(RegistryError::EmptyToken);
                }
                Some(self.secrets.encrypt(token.trim())?)
            }
            None => None,
        };

        let agent = agents.get_mut(&uuid).ok_or(RegistryError::NotFound)?;
        if let Some(name) = patch.name {
            agent.name = name.trim().to_string();
        }
        if let Some(address) = address {
            agent.address = address;
        }
        if let Some(token) = token {
            agent.token = token;
        }
        if let Some(icon) = patch.icon {
            agent.icon = icon;
        }
        if let Some(color) = patch.color {
            agent.color = color;
        }
        agent.updated_at = chrono::Utc::now();
        let updated = agent.clone();

        if let Err(e) = self.save_to_disk(&agents) {
            tracing::error!("Failed to save agent registry: {}", e);
        }

        Ok(updated)
    }

    /// Remove an agent. Returns false when the uuid was not registered.
    pub async fn delete(&self, uuid: Uuid) -> bool {
        let mut agents = self.agents.write().await;
        let existed = agents.remove(&uuid).is_some();

        if existed {
            if let Err(e) = self.save_to_disk(&agents) {
                tracing::error!("Failed to save agent registry: {}", e);
            }
            tracing::info!(uuid = %uuid, "Deleted agent");
        }

        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    async fn test_store(dir: &tempfile::TempDir) -> AgentStore {
        let secrets = SecretBox::new(crypto::generate_key());
        AgentStore::new(dir.path().join("agents.json"), secrets).await
    }

    fn sample_agent() -> NewAgent {
        NewAgent {
            name: "seedbox".to_string(),
            kind: "qbittorrent".to_string(),
            address: "http://10.0.0.5:9090".to_string(),
            token: "s3cret".to_string(),
            icon: "server".to_string(),
            color: "#2dd4bf".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let agent = store.create(sample_agent()).await.unwrap();
        let fetched = store.get(agent.uuid).await.unwrap();

        assert_eq!(fetched.name, "seedbox");
        assert_eq!(fetched.address, "http://10.0.0.5:9090");
        assert_eq!(fetched.icon, "server");
        assert_eq!(fetched.color, "#2dd4bf");
        // Stored token must be ciphertext, recoverable via the secret box.
        assert_ne!(fetched.token, "s3cret");
        assert_eq!(fetched.decrypt_token(store.secrets()).unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn empty_token_is_rejected_without_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let mut input = sample_agent();
        input.token = "   ".to_string();
        assert!(matches!(
            store.create(input).await,
            Err(RegistryError::EmptyToken)
        ));
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn unparsable_address_is_rejected_without_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let mut input = sample_agent();
        input.address = "not a url".to_string();
        assert!(matches!(
            store.create(input).await,
            Err(RegistryError::InvalidAddress(_))
        ));

        let mut input = sample_agent();
        input.address = "ftp://10.0.0.5".to_string();
        assert!(matches!(
            store.create(input).await,
            Err(RegistryError::InvalidAddress(_))
        ));

        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let mut input = sample_agent();
        input.kind = "transmission".to_string();
        assert!(matches!(
            store.create(input).await,
            Err(RegistryError::UnknownKind(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store.create(sample_agent()).await.unwrap();
        assert!(matches!(
            store.create(sample_agent()).await,
            Err(RegistryError::DuplicateName(_))
        ));
    }

    #[tokio::test]
    async fn update_keeps_omitted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let agent = store.create(sample_agent()).await.unwrap();

        let updated = store
            .update(
                agent.uuid,
                AgentPatch {
                    color: Some("#f43f5e".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "seedbox");
        assert_eq!(updated.address, "http://10.0.0.5:9090");
        assert_eq!(updated.color, "#f43f5e");
        // Token untouched by the patch.
        assert_eq!(updated.decrypt_token(store.secrets()).unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn update_overwrites_token_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let agent = store.create(sample_agent()).await.unwrap();

        let updated = store
            .update(
                agent.uuid,
                AgentPatch {
                    token: Some("fresh-token".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.decrypt_token(store.secrets()).unwrap(), "fresh-token");
    }

    #[tokio::test]
    async fn delete_is_reported_per_rest_convention() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let agent = store.create(sample_agent()).await.unwrap();

        assert!(store.delete(agent.uuid).await);
        assert!(!store.delete(agent.uuid).await);
    }

    #[tokio::test]
    async fn registry_persists_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = SecretBox::new(crypto::generate_key());
        let path = dir.path().join("agents.json");

        let agent = {
            let store = AgentStore::new(path.clone(), secrets.clone()).await;
            store.create(sample_agent()).await.unwrap()
        };

        let store = AgentStore::new(path, secrets).await;
        let reloaded = store.get(agent.uuid).await.unwrap();
        assert_eq!(reloaded.name, "seedbox");
        assert_eq!(reloaded.decrypt_token(store.secrets()).unwrap(), "s3cret");
    }
}
