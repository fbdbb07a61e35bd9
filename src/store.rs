//! Storage collaborator interface and an in-memory implementation.
//!
//! Record persistence lives outside this crate. [`ImageStore`] is the seam:
//! the upload flow creates records through it and edit sessions persist
//! filter vectors through it. [`MemoryStore`] enforces the same rules a real
//! backend must (required title and image, per-user image ceiling) and is what
//! the tests and examples run against.

use crate::config::BudgetConfig;
use crate::filter::FilterVector;
use crate::payload::decode_payload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Default per-user image ceiling.
pub const MAX_IMAGES: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("You have reached the maximum limit of {limit} images")]
    QuotaExceeded { limit: usize },
    #[error("Image not found: {0}")]
    NotFound(ImageId),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the user can fix this by freeing space (deleting an image).
    pub fn is_budget(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }
}

/// Identity of a stored image record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub String);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Record creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewImage {
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Data URL, see [`crate::payload`].
    pub image_data: String,
    /// Size in bytes of the file the user originally selected.
    pub original_size: u64,
}

impl NewImage {
    /// Reject blank titles and payloads that carry no image bytes.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.title.trim().is_empty() {
            return Err(StoreError::Validation("title is required".to_string()));
        }
        decode_payload(&self.image_data)
            .map_err(|e| StoreError::Validation(format!("image is required: {e}")))?;
        Ok(())
    }
}

/// A stored image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: ImageId,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub image_data: String,
    /// Absent means the identity vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterVector>,
    pub original_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage collaborator consumed by uploads and edit sessions.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Create a record, enforcing required fields and the image ceiling.
    async fn create(&self, image: NewImage) -> Result<ImageRecord, StoreError>;

    /// Persist the filter vector of an existing record.
    async fn save_filters(&self, id: &ImageId, filters: &FilterVector) -> Result<(), StoreError>;
}

/// In-memory [`ImageStore`].
pub struct MemoryStore {
    max_images: usize,
    records: Mutex<Vec<ImageRecord>>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_limit(MAX_IMAGES)
    }

    /// Store enforcing the configured image ceiling.
    pub fn from_config(budget: &BudgetConfig) -> Self {
        Self::with_limit(budget.max_images)
    }

    pub fn with_limit(max_images: usize) -> Self {
        Self {
            max_images,
            records: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn get(&self, id: &ImageId) -> Option<ImageRecord> {
        self.records.lock().iter().find(|r| &r.id == id).cloned()
    }

    /// Remove a record, freeing one slot of the owner's quota.
    pub fn delete(&self, id: &ImageId) -> Result<ImageRecord, StoreError> {
        let mut records = self.records.lock();
        let idx = records
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(records.remove(idx))
    }

    pub fn count_for(&self, user_id: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn create(&self, image: NewImage) -> Result<ImageRecord, StoreError> {
        image.validate()?;

        let mut records = self.records.lock();
        let owned = records.iter().filter(|r| r.user_id == image.user_id).count();
        if owned >= self.max_images {
            tracing::info!(user = %image.user_id, owned, "image quota reached");
            return Err(StoreError::QuotaExceeded {
                limit: self.max_images,
            });
        }

        let now = Utc::now();
        let id = ImageId(format!(
            "img-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));
        let record = ImageRecord {
            id,
            user_id: image.user_id,
            title: image.title,
            tags: image.tags,
            image_data: image.image_data,
            filters: None,
            original_size: image.original_size,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        tracing::debug!(id = %record.id, "image record created");
        Ok(record)
    }

    async fn save_filters(&self, id: &ImageId, filters: &FilterVector) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.filters = Some(*filters);
        record.updated_at = Utc::now();
        Ok(())
    }
}
