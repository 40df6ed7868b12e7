//! Stack persistence.
//!
//! Backends store [`StackRecord`]s keyed by global name and find them again
//! by tag. Every backend must be safe to share between threads.

mod file;
mod memory;

pub use file::{DEFAULT_STACK_DIR, FileStorage};
pub use memory::MemoryStorage;

use std::fmt;

use crate::Tags;
use crate::error::Result;
use crate::stack::StackRecord;

/// Backend-specific settings, as given under `storage.settings`.
pub type StorageOptions = serde_json::Map<String, serde_json::Value>;

/// A place to keep serialized stacks.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Apply backend-specific settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for malformed settings.
    fn configure(&mut self, settings: &StorageOptions) -> Result<()>;

    /// The stack stored under `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn load(&self, name: &str) -> Result<Option<StackRecord>>;

    /// Store a stack under its global name, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn dump(&self, record: &StackRecord) -> Result<()>;

    /// Global names of stacks whose tags contain every given pair, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn search(&self, tags: &Tags) -> Result<Vec<String>>;

    /// Remove a stack. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn delete(&self, name: &str) -> Result<bool>;
}
