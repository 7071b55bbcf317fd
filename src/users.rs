//! User accounts for the dashboard.
//!
//! Passwords are stored as PBKDF2-HMAC-SHA256 hashes with a per-user salt;
//! plaintext never touches disk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::crypto;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("email is required")]
    EmailRequired,

    #[error("password is required")]
    PasswordRequired,

    #[error("password must be at least 8 characters")]
    PasswordTooShort,

    #[error("user already exists")]
    AlreadyExists,

    #[error("invalid credentials")]
    InvalidCredentials,
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::AlreadyExists => ApiError::conflict("User already exists"),
            UserError::InvalidCredentials => ApiError::unauthorized("Invalid credentials"),
            other => ApiError::validation(other.to_string()),
        }
    }
}

/// Disk-backed user store.
#[derive(Debug)]
pub struct UserStore {
    users: RwLock<HashMap<Uuid, User>>,
    storage_path: PathBuf,
}

impl UserStore {
    pub async fn new(storage_path: PathBuf) -> Self {
        let store = Self {
            users: RwLock::new(HashMap::new()),
            storage_path,
        };

        match store.load_from_disk() {
            Ok(loaded) => {
                let mut users = store.users.write().await;
                *users = loaded;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    path = %store.storage_path.display(),
                    "Failed to load users: {}",
                    e
                );
            }
        }

        store
    }

    fn load_from_disk(&self) -> Result<HashMap<Uuid, User>, std::io::Error> {
        let contents = std::fs::read_to_string(&self.storage_path)?;
        let users: Vec<User> = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(users.into_iter().map(|u| (u.uuid, u)).collect())
    }

    fn save_to_disk(&self, users: &HashMap<Uuid, User>) -> Result<(), std::io::Error> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let list: Vec<&User> = users.values().collect();
        let contents = serde_json::to_string_pretty(&list)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp_path = self.storage_path.with_extension("tmp");
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &self.storage_path)?;
        Ok(())
    }

    fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Register a new user.
    pub async fn create(&self, email: &str, password: &str) -> Result<User, UserError> {
        let email = Self::normalize_email(email);
        if email.is_empty() {
            return Err(UserError::EmailRequired);
        }
        if password.is_empty() {
            return Err(UserError::PasswordRequired);
        }
        if password.len() < 8 {
            return Err(UserError::PasswordTooShort);
        }

        let salt = crypto::generate_salt();
        let password_hash = crypto::hash_password(password, &salt);
        let now = chrono::Utc::now();
        let user = User {
            uuid: Uuid::new_v4(),
            email,
            password_hash,
            salt,
            created_at: now,
            updated_at: now,
        };

        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(UserError::AlreadyExists);
        }
        users.insert(user.uuid, user.clone());

        if let Err(e) = self.save_to_disk(&users) {
            tracing::error!("Failed to save users: {}", e);
        }

        tracing::info!(email = %user.email, "Registered user");
        Ok(user)
    }

    /// Check a password against the stored hash. The same error covers
    /// unknown emails and wrong passwords.
    pub async fn verify(&self, email: &str, password: &str) -> Result<User, UserError> {
        let email = Self::normalize_email(email);
        let users = self.users.read().await;

        let user = users
            .values()
            .find(|u| u.email == email)
            .ok_or(UserError::InvalidCredentials)?;

        if !crypto::verify_password(password, &user.salt, &user.password_hash) {
            return Err(UserError::InvalidCredentials);
        }

        Ok(user.clone())
    }

    pub async fn get(&self, uuid: Uuid) -> Option<User> {
        self.users.read().await.get(&uuid).cloned()
    }
}
