//! Stack provisioning for shepherd.
//!
//! A [`Stack`] is a named set of interdependent [`Resource`]s. Stacks are
//! built from a manifest, created and destroyed in dependency order through
//! the task executor, and persisted by a [`Storage`] backend so later runs
//! pick up where earlier ones stopped.
//!
//! # Key Types
//!
//! - [`Config`]: Settings plus the [`PluginRegistry`] used to build resources and storage
//! - [`Stack`]: Resource collection, dependency graphs and persistence
//! - [`Resource`]: Trait every provisionable kind implements
//! - [`Storage`]: Trait for stack persistence backends
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shepherd_core::{Config, FileManifest, PluginRegistry, Settings, SimulatedNetwork, actions};
//!
//! let registry = PluginRegistry::builtin(Arc::new(SimulatedNetwork::new()));
//! let config = Config::new("dev", Settings::default(), Arc::new(registry))?;
//! let stack = actions::create_stack("web", &config, &FileManifest::new("stack.yml"))?;
//! actions::destroy_stack(stack.global_name(), &config)?;
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod manifest;
pub mod plugins;
pub mod resource;
pub mod resources;
pub mod stack;
pub mod storage;
mod template;

use std::collections::BTreeMap;

pub use config::{Config, Settings, StorageSettings};
pub use error::{Error, Result};
pub use manifest::{FileManifest, ManifestLoader, StaticManifest};
pub use plugins::{Plugin, PluginCategory, PluginRegistry};
pub use resource::{
    Resource, ResourceBase, ResourceRecord, ResourceState, SharedResource, StackRef,
};
pub use resources::{
    IngressRule, NetworkApi, NetworkOperation, SecurityGroup, SecurityGroupIngress,
    SecurityGroupInfo, SimulatedNetwork,
};
pub use stack::{Stack, StackContext, StackRecord};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageOptions};

/// String key/value labels on stacks and resources.
pub type Tags = BTreeMap<String, String>;

/// Whether `have` contains every pair in `want`.
///
/// An empty `want` matches everything.
#[must_use]
pub fn tags_match(have: &Tags, want: &Tags) -> bool {
    want.iter()
        .all(|(key, value)| have.get(key).is_some_and(|v| v == value))
}
