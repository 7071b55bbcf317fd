//! Category configuration store.
//!
//! Categories pre-fill task creation (default tags, save directories).
//! `id` and `name` are fixed at creation — historical task tagging references
//! categories by name, so renames are rejected server-side even though the
//! dashboard already disables the field.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub default_tags: Vec<String>,
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub icon: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub default_tags: Vec<String>,
    pub directories: Vec<String>,
    pub color: String,
    pub icon: String,
}

/// Partial update. A `name` that differs from the stored one is rejected.
#[derive(Debug, Clone, Default)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    pub default_tags: Option<Vec<String>>,
    pub directories: Option<Vec<String>>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CategoryError {
    #[error("category name cannot be empty")]
    EmptyName,

    #[error("a category named {0} already exists")]
    DuplicateName(String),

    #[error("category name is immutable")]
    NameImmutable,

    #[error("category not found")]
    NotFound,
}

impl From<CategoryError> for ApiError {
    fn from(err: CategoryError) -> Self {
        match err {
            CategoryError::NotFound => ApiError::not_found("Category not found"),
            CategoryError::DuplicateName(_) => ApiError::conflict("Category already exists"),
            other => ApiError::validation(other.to_string()),
        }
    }
}

/// Disk-backed category store.
#[derive(Debug)]
pub struct CategoryStore {
    categories: RwLock<HashMap<String, Category>>,
    storage_path: PathBuf,
}

impl CategoryStore {
    pub async fn new(storage_path: PathBuf) -> Self {
        let store = Self {
            categories: RwLock::new(HashMap::new()),
            storage_path,
        };

        match store.load_from_disk() {
            Ok(loaded) => {
                let mut categories = store.categories.write().await;
                *categories = loaded;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    path = %store.storage_path.display(),
                    "Failed to load categories: {}",
                    e
                );
            }
        }

        store
    }

    fn load_from_disk(&self) -> Result<HashMap<String, Category>, std::io::Error> {
        let contents = std::fs::read_to_string(&self.storage_path)?;
        let categories: Vec<Category> = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(categories.into_iter().map(|c| (c.id.clone(), c)).collect())
    }

    fn save_to_disk(&self, categories: &HashMap<String, Category>) -> Result<(), std::io::Error> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut list: Vec<&Category> = categories.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        let contents = serde_json::to_string_pretty(&list)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp_path = self.storage_path.with_extension("tmp");
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &self.storage_path)?;
        Ok(())
    }

    pub async fn list(&self) -> Vec<Category> {
        let categories = self.categories.read().await;
        let mut list: Vec<_> = categories.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn get(&self, id: &str) -> Option<Category> {
        self.categories.read().await.get(id).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Category> {
        self.categories
            .read()
            .await
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    pub async fn create(&self, input: NewCategory) -> Result<Category, CategoryError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(CategoryError::EmptyName);
        }

        let now = chrono::Utc::now();
        let category = Category {
            id: Uuid::new_v4().to_string(),
            name,
            default_tags: input.default_tags,
            directories: input.directories,
            color: input.color,
            icon: input.icon,
            created_at: now,
            updated_at: now,
        };

        let mut categories = self.categories.write().await;
        if categories.values().any(|c| c.name == category.name) {
            return Err(CategoryError::DuplicateName(category.name));
        }
        categories.insert(category.id.clone(), category.clone());

        if let Err(e) = self.save_to_disk(&categories) {
            tracing::error!("Failed to save categories: {}", e);
        }

        Ok(category)
    }

    /// Update mutable fields. `name` must be absent or equal to the stored
    /// name — categories are never renamed.
    pub async fn update(&self, id: &str, update: CategoryUpdate) -> Result<Category, CategoryError> {
        let mut categories = self.categories.write().await;
        let category = categories.get_mut(id).ok_or(CategoryError::NotFound)?;

        if let Some(name) = update.name {
            if name != category.name {
                return Err(CategoryError::NameImmutable);
            }
        }

        if let Some(default_tags) = update.default_tags {
            category.default_tags = default_tags;
        }
        if let Some(directories) = update.directories {
            category.directories = directories;
        }
        if let Some(color) = update.color {
            category.color = color;
        }
        if let Some(icon) = update.icon {
            category.icon = icon;
        }
        category.updated_at = chrono::Utc::now();
        let updated = category.clone();

        if let Err(e) = self.save_to_disk(&categories) {
            tracing::error!("Failed to save categories: {}", e);
        }

        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> bool {
        let mut categories = self.categories.write().await;
        let existed = categories.remove(id).is_some();

        if existed {
            if let Err(e) = self.save_to_disk(&categories) {
                tracing::error!("Failed to save categories: {}", e);
            }
        }

        existed
    }
}
