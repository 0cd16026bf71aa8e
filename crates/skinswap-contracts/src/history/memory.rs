use std::collections::HashMap;

use super::{ensure_persistable, recent_first, GeneratedImage, HistoryStore};
use crate::error::StudioError;

/// Process-local history used when no persistent store is available, and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    records: HashMap<String, GeneratedImage>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn put(&mut self, record: &GeneratedImage) -> Result<(), StudioError> {
        ensure_persistable(record)?;
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<GeneratedImage>, StudioError> {
        let mut records: Vec<GeneratedImage> = self.records.values().cloned().collect();
        records.sort_by(recent_first);
        Ok(records)
    }

    fn delete_by_id(&mut self, id: &str) -> Result<(), StudioError> {
        self.records.remove(id);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StudioError> {
        self.records.clear();
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<GeneratedImage>, StudioError> {
        Ok(self.records.get(id).cloned())
    }
}
