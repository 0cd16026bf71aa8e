mod json_store;
mod memory;

pub use json_store::{JsonHistoryStore, HISTORY_SCHEMA_VERSION};
pub use memory::MemoryHistoryStore;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::StudioError;
use crate::modes::{ItemStatus, StudioMode};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One generated image, either in the current batch or persisted in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    /// Data URL of the image; empty while pending or after a failure.
    pub url: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub mode: Option<StudioMode>,
    /// Milliseconds since the unix epoch, shared by every record of a batch.
    #[serde(default)]
    pub timestamp: i64,
}

impl GeneratedImage {
    pub fn pending(id: impl Into<String>, mode: StudioMode) -> Self {
        Self {
            id: id.into(),
            url: String::new(),
            status: ItemStatus::Pending,
            mode: Some(mode),
            timestamp: 0,
        }
    }

    pub fn is_persistable(&self) -> bool {
        self.status == ItemStatus::Succeeded && !self.url.trim().is_empty()
    }
}

/// Persistent archive of succeeded generations keyed by record id.
///
/// Every read reflects the persisted state at call time.
pub trait HistoryStore: Send {
    /// Insert or overwrite the record with the same id.
    fn put(&mut self, record: &GeneratedImage) -> Result<(), StudioError>;

    /// All records, newest first.
    fn list_all(&self) -> Result<Vec<GeneratedImage>, StudioError>;

    /// Remove a record; absent ids are not an error.
    fn delete_by_id(&mut self, id: &str) -> Result<(), StudioError>;

    fn clear(&mut self) -> Result<(), StudioError>;

    /// Hold the store against other writers until [`HistoryStore::end_exclusive`].
    ///
    /// Calls made through this handle in between do not block on themselves.
    fn begin_exclusive(&mut self) -> Result<(), StudioError> {
        Ok(())
    }

    fn end_exclusive(&mut self) {}

    fn get(&self, id: &str) -> Result<Option<GeneratedImage>, StudioError> {
        Ok(self
            .list_all()?
            .into_iter()
            .find(|record| record.id == id))
    }
}

pub(crate) fn ensure_persistable(record: &GeneratedImage) -> Result<(), StudioError> {
    if record.id.trim().is_empty() {
        return Err(StudioError::Storage("record id must not be empty".to_string()));
    }
    if !record.is_persistable() {
        return Err(StudioError::Storage(format!(
            "record '{}' is {} and cannot be persisted",
            record.id, record.status
        )));
    }
    Ok(())
}

/// Newest first; equal timestamps fall back to id order.
pub fn recent_first(left: &GeneratedImage, right: &GeneratedImage) -> Ordering {
    right
        .timestamp
        .cmp(&left.timestamp)
        .then_with(|| left.id.cmp(&right.id))
}

/// Ids that fall past `limit` in a newest-first listing, oldest last.
pub fn overflow_ids(records: &[GeneratedImage], limit: usize) -> Vec<String> {
    records
        .iter()
        .skip(limit)
        .map(|record| record.id.clone())
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::GeneratedImage;
    use crate::modes::{ItemStatus, StudioMode};

    pub fn succeeded(id: &str, timestamp: i64) -> GeneratedImage {
        GeneratedImage {
            id: id.to_string(),
            url: format!("data:image/png;base64,{id}"),
            status: ItemStatus::Succeeded,
            mode: Some(StudioMode::Derive),
            timestamp,
        }
    }
}
