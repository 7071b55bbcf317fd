//! Opaque session tokens for dashboard auth.
//!
//! Sessions are 256-bit random tokens delivered as an HTTP-only cookie and
//! valid for seven days. Expired sessions are dropped lazily on validation
//! and can be swept with [`SessionStore::cleanup_expired`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::crypto;

/// Session lifetime in days.
const SESSION_DURATION_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_uuid: Uuid,
    pub token: String,
    pub user_agent: String,
    pub ip_address: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at < chrono::Utc::now()
    }
}

/// Disk-backed session store, keyed by token.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    storage_path: PathBuf,
}

impl SessionStore {
    pub async fn new(storage_path: PathBuf) -> Self {
        let store = Self {
            sessions: RwLock::new(HashMap::new()),
            storage_path,
        };

        match store.load_from_disk() {
            Ok(loaded) => {
                let mut sessions = store.sessions.write().await;
                *sessions = loaded;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    path = %store.storage_path.display(),
                    "Failed to load sessions: {}",
                    e
                );
            }
        }

        store
    }

    fn load_from_disk(&self) -> Result<HashMap<String, Session>, std::io::Error> {
        let contents = std::fs::read_to_string(&self.storage_path)?;
        let sessions: Vec<Session> = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(sessions
            .into_iter()
            .map(|s| (s.token.clone(), s))
            .collect())
    }

    fn save_to_disk(&self, sessions: &HashMap<String, Session>) -> Result<(), std::io::Error> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let list: Vec<&Session> = sessions.values().collect();
        let contents = serde_json::to_string_pretty(&list)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp_path = self.storage_path.with_extension("tmp");
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &self.storage_path)?;
        Ok(())
    }

    /// Open a new session for a user.
    pub async fn create(&self, user_uuid: Uuid, user_agent: &str, ip_address: &str) -> Session {
        let now = chrono::Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_uuid,
            token: crypto::generate_session_token(),
            user_agent: user_agent.to_string(),
            ip_address: ip_address.to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::days(SESSION_DURATION_DAYS),
        };

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.token.clone(), session.clone());

        if let Err(e) = self.save_to_disk(&sessions) {
            tracing::error!("Failed to save sessions: {}", e);
        }

        session
    }

    /// Look up a session by token; expired sessions are removed on the spot.
    pub async fn validate(&self, token: &str) -> Option<Session> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(session) if !session.is_expired() => return Some(session.clone()),
                None => return None,
                Some(_) => {}
            }
        }

        // Expired — drop it.
        let mut sessions = self.sessions.write().await;
        sessions.remove(token);
        if let Err(e) = self.save_to_disk(&sessions) {
            tracing::error!("Failed to save sessions: {}", e);
        }
        None
    }

    /// Invalidate one session (logout).
    pub async fn delete(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let existed = sessions.remove(token).is_some();
        if existed {
            if let Err(e) = self.save_to_disk(&sessions) {
                tracing::error!("Failed to save sessions: {}", e);
            }
        }
        existed
    }

    /// Invalidate every session of a user (logout from all devices).
    pub async fn delete_for_user(&self, user_uuid: Uuid) {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| s.user_uuid != user_uuid);
        if let Err(e) = self.save_to_disk(&sessions) {
            tracing::error!("Failed to save sessions: {}", e);
        }
    }

    /// Active sessions of a user, most recent first.
    pub async fn list_for_user(&self, user_uuid: Uuid) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<_> = sessions
            .values()
            .filter(|s| s.user_uuid == user_uuid && !s.is_expired())
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Drop every expired session.
    pub async fn cleanup_expired(&self) {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        if sessions.len() != before {
            if let Err(e) = self.save_to_disk(&sessions) {
                tracing::error!("Failed to save sessions: {}", e);
            }
        }
    }
}
