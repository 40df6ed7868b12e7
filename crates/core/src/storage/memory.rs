//! In-process storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Storage, StorageOptions};
use crate::error::Result;
use crate::stack::StackRecord;
use crate::{Tags, tags_match};

/// Stacks kept in memory. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    stacks: Arc<RwLock<BTreeMap<String, StackRecord>>>,
}

impl MemoryStorage {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored stacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stacks.read().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stacks.read().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn configure(&mut self, _settings: &StorageOptions) -> Result<()> {
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<StackRecord>> {
        Ok(self.stacks.read().get(name).cloned())
    }

    fn dump(&self, record: &StackRecord) -> Result<()> {
        self.stacks
            .write()
            .insert(record.global_name.clone(), record.clone());
        Ok(())
    }

    fn search(&self, tags: &Tags) -> Result<Vec<String>> {
        Ok(self
            .stacks
            .read()
            .values()
            .filter(|record| tags_match(&record.tags, tags))
            .map(|record| record.global_name.clone())
            .collect())
    }

    fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.stacks.write().remove(name).is_some())
    }
}
