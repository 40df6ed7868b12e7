//! Explicit registry of resource and storage implementations.
//!
//! Every implementation is registered by name together with a constructor.
//! Lookups always return fresh instances, so two resources of the same type
//! never share state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::resources::{NetworkApi, SecurityGroup, SecurityGroupIngress};
use crate::storage::{FileStorage, MemoryStorage, Storage};

type ResourceConstructor = Arc<dyn Fn() -> Box<dyn Resource> + Send + Sync>;
type StorageConstructor = Arc<dyn Fn() -> Box<dyn Storage> + Send + Sync>;

/// Plugin categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginCategory {
    /// Provisionable infrastructure
    Resource,
    /// Stack persistence backends
    Storage,
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource => write!(f, "Resource"),
            Self::Storage => write!(f, "Storage"),
        }
    }
}

/// A freshly constructed plugin instance.
pub enum Plugin {
    /// A resource instance
    Resource(Box<dyn Resource>),
    /// A storage backend instance
    Storage(Box<dyn Storage>),
}

impl Plugin {
    /// Category this instance belongs to.
    #[must_use]
    pub const fn category(&self) -> PluginCategory {
        match self {
            Self::Resource(_) => PluginCategory::Resource,
            Self::Storage(_) => PluginCategory::Storage,
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(resource) => f.debug_tuple("Resource").field(&resource.kind()).finish(),
            Self::Storage(storage) => f.debug_tuple("Storage").field(storage).finish(),
        }
    }
}

struct ResourcePlugin {
    provider: String,
    constructor: ResourceConstructor,
}

/// Maps plugin names to constructors, per category.
#[derive(Default)]
pub struct PluginRegistry {
    resources: BTreeMap<String, Vec<ResourcePlugin>>,
    storages: BTreeMap<String, StorageConstructor>,
}

impl PluginRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the shipped resource kinds and storage backends.
    ///
    /// Resource kinds talk to `network`. `MemoryStorage` instances handed
    /// out by this registry all share one store.
    #[must_use]
    pub fn builtin(network: Arc<dyn NetworkApi>) -> Self {
        let mut registry = Self::new();

        let api = Arc::clone(&network);
        registry.register_resource(SecurityGroup::TYPE, "aws", move || {
            Box::new(SecurityGroup::new(Arc::clone(&api)))
        });
        let api = network;
        registry.register_resource(SecurityGroupIngress::TYPE, "aws", move || {
            Box::new(SecurityGroupIngress::new(Arc::clone(&api)))
        });

        let memory = MemoryStorage::default();
        registry.register_storage("MemoryStorage", move || Box::new(memory.clone()));
        registry.register_storage("FileStorage", || Box::new(FileStorage::default()));

        registry
    }

    /// Register a resource implementation for a type and provider.
    pub fn register_resource<F>(
        &mut self,
        resource_type: impl Into<String>,
        provider: impl Into<String>,
        constructor: F,
    ) -> &mut Self
    where
        F: Fn() -> Box<dyn Resource> + Send + Sync + 'static,
    {
        let resource_type = resource_type.into();
        let provider = provider.into();
        debug!(resource_type = %resource_type, provider = %provider, "Registered resource plugin");
        self.resources
            .entry(resource_type)
            .or_default()
            .push(ResourcePlugin {
                provider,
                constructor: Arc::new(constructor),
            });
        self
    }

    /// Register a storage backend under a name.
    pub fn register_storage<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Storage> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(storage = %name, "Registered storage plugin");
        self.storages.insert(name, Arc::new(constructor));
        self
    }

    /// Fresh instances matching the optional category and name filters.
    #[must_use]
    pub fn get_plugins(&self, category: Option<PluginCategory>, name: Option<&str>) -> Vec<Plugin> {
        let mut plugins = Vec::new();

        if category.is_none_or(|c| c == PluginCategory::Resource) {
            plugins.extend(
                self.resources
                    .iter()
                    .filter(|(resource_type, _)| name.is_none_or(|n| n == resource_type.as_str()))
                    .flat_map(|(_, impls)| impls.iter())
                    .map(|plugin| Plugin::Resource((plugin.constructor)())),
            );
        }

        if category.is_none_or(|c| c == PluginCategory::Storage) {
            plugins.extend(
                self.storages
                    .iter()
                    .filter(|(storage, _)| name.is_none_or(|n| n == storage.as_str()))
                    .map(|(_, constructor)| Plugin::Storage(constructor())),
            );
        }

        plugins
    }

    /// Fresh instances of every implementation of a resource type.
    #[must_use]
    pub fn resources(&self, resource_type: &str) -> Vec<Box<dyn Resource>> {
        self.resources
            .get(resource_type)
            .map(|impls| impls.iter().map(|plugin| (plugin.constructor)()).collect())
            .unwrap_or_default()
    }

    /// A fresh resource for a type, matching the provider case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginNotFound`] for an unknown type, or
    /// [`Error::ProviderMismatch`] if the type exists for other providers only.
    pub fn resource(&self, resource_type: &str, provider: &str) -> Result<Box<dyn Resource>> {
        let impls = self
            .resources
            .get(resource_type)
            .ok_or_else(|| Error::plugin_not_found(PluginCategory::Resource.to_string(), resource_type))?;

        impls
            .iter()
            .find(|plugin| plugin.provider.eq_ignore_ascii_case(provider))
            .map(|plugin| (plugin.constructor)())
            .ok_or_else(|| Error::ProviderMismatch {
                resource_type: resource_type.to_string(),
                provider: provider.to_string(),
            })
    }

    /// Fresh instances of the storage backend with this name.
    #[must_use]
    pub fn storages(&self, name: &str) -> Vec<Box<dyn Storage>> {
        self.storages
            .get(name)
            .map(|constructor| vec![constructor()])
            .unwrap_or_default()
    }

    /// A fresh storage backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginNotFound`] if no backend has this name.
    pub fn storage(&self, name: &str) -> Result<Box<dyn Storage>> {
        self.storages(name)
            .pop()
            .ok_or_else(|| Error::plugin_not_found(PluginCategory::Storage.to_string(), name))
    }

    /// Registered names in a category, sorted.
    #[must_use]
    pub fn names(&self, category: PluginCategory) -> Vec<String> {
        match category {
            PluginCategory::Resource => self.resources.keys().cloned().collect(),
            PluginCategory::Storage => self.storages.keys().cloned().collect(),
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("resources", &self.names(PluginCategory::Resource))
            .field("storages", &self.names(PluginCategory::Storage))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::SimulatedNetwork;

    fn registry() -> PluginRegistry {
        PluginRegistry::builtin(Arc::new(SimulatedNetwork::new()))
    }

    #[test]
    fn test_builtin_names() {
        let registry = registry();
        assert_eq!(
            registry.names(PluginCategory::Resource),
            vec!["SecurityGroup", "SecurityGroupIngress"]
        );
        assert_eq!(
            registry.names(PluginCategory::Storage),
            vec!["FileStorage", "MemoryStorage"]
        );
    }

    #[test]
    fn test_get_plugins_filters() {
        let registry = registry();
        assert_eq!(registry.get_plugins(None, None).len(), 4);
        assert_eq!(
            registry
                .get_plugins(Some(PluginCategory::Storage), None)
                .len(),
            2
        );

        let found = registry.get_plugins(Some(PluginCategory::Resource), Some("SecurityGroup"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].category(), PluginCategory::Resource);

        assert!(registry.get_plugins(None, Some("Nope")).is_empty());
    }

    #[test]
    fn test_resource_instances_are_fresh() {
        let registry = registry();
        let mut first = registry.resource("SecurityGroup", "aws").unwrap();
        first.base_mut().set_local_name("one");
        let second = registry.resource("SecurityGroup", "aws").unwrap();
        assert_eq!(second.base().local_name(), "");
    }

    #[test]
    fn test_provider_matched_case_insensitively() {
        let registry = registry();
        assert!(registry.resource("SecurityGroup", "AWS").is_ok());
        assert!(matches!(
            registry.resource("SecurityGroup", "gcp"),
            Err(Error::ProviderMismatch { .. })
        ));
        assert!(matches!(
            registry.resource("Bucket", "aws"),
            Err(Error::PluginNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_storage() {
        assert!(matches!(
            registry().storage("DynamoStorage"),
            Err(Error::PluginNotFound { .. })
        ));
    }
}
