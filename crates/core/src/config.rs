//! Settings and the configuration handle threaded through every operation.
//!
//! A [`Config`] bundles a name, validated [`Settings`] and the
//! [`PluginRegistry`] used to construct resources and storage backends.
//! Nothing here is global: callers build a `Config` and pass it down.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shepherd_task_graph::{Executor, ExecutorConfig};
use tracing::{debug, instrument};

use crate::Tags;
use crate::error::{Error, Result};
use crate::plugins::PluginRegistry;
use crate::storage::Storage;
use crate::template;

/// Tag keys every stack carries, usable in `stack_name_fmt`.
pub const BUILTIN_TAG_KEYS: [&str; 2] = ["stack_name", "stack_creation"];

/// Runtime settings, usually read from a YAML or JSON file.
///
/// Every field has a default, so a partial file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default manifest location used by the CLI
    pub manifest_path: String,

    /// Default CLI log level when `--level` is not given (0 = errors only, 4 = trace)
    pub verbosity: u8,

    /// Extra attempts for each resource task
    pub retries: u32,

    /// Seconds to wait between attempts
    pub delay: u64,

    /// Free-form variables, persisted with each stack for external tooling
    pub vars: BTreeMap<String, serde_json::Value>,

    /// Which storage backend persists stacks
    pub storage: StorageSettings,

    /// Template for stack global names, over the stack's tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_name_fmt: Option<String>,

    /// Tags added to every stack, overriding the built-in ones
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,

    /// Upper bound on resource tasks running at once
    pub max_parallel: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manifest_path: String::new(),
            verbosity: 2,
            retries: 120,
            delay: 5,
            vars: BTreeMap::new(),
            storage: StorageSettings::default(),
            stack_name_fmt: None,
            tags: None,
            max_parallel: 1,
        }
    }
}

impl Settings {
    /// Pause between resource task attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    /// Executor tuned by these settings.
    #[must_use]
    pub const fn executor(&self) -> Executor {
        Executor::new(ExecutorConfig {
            max_parallel: self.max_parallel,
        })
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty storage name, a zero
    /// `max_parallel`, or a `stack_name_fmt` that references a tag no stack
    /// built from these settings will carry.
    pub fn validate(&self) -> Result<()> {
        if self.storage.name.trim().is_empty() {
            return Err(Error::config("storage.name must not be empty"));
        }

        if self.max_parallel == 0 {
            return Err(Error::config("max_parallel must be at least 1"));
        }

        if let Some(fmt) = &self.stack_name_fmt {
            if fmt.trim().is_empty() {
                return Err(Error::config("stack_name_fmt must not be empty"));
            }
            for key in template::placeholders(fmt)? {
                let known = BUILTIN_TAG_KEYS.contains(&key.as_str())
                    || self.tags.as_ref().is_some_and(|tags| tags.contains_key(&key));
                if !known {
                    return Err(Error::config(format!(
                        "stack_name_fmt references unknown tag '{key}'"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Storage backend selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Registered storage plugin name
    pub name: String,

    /// Backend-specific settings handed to [`Storage::configure`]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            name: "FileStorage".to_string(),
            settings: serde_json::Map::new(),
        }
    }
}

/// A named set of settings bound to a plugin registry.
#[derive(Clone)]
pub struct Config {
    name: String,
    settings: Settings,
    registry: Arc<PluginRegistry>,
}

impl Config {
    /// Build a config after validating its settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings fail [`Settings::validate`].
    pub fn new(
        name: impl Into<String>,
        settings: Settings,
        registry: Arc<PluginRegistry>,
    ) -> Result<Self> {
        settings.validate()?;
        let name = name.into();
        debug!(config = %name, storage = %settings.storage.name, "Created config");
        Ok(Self {
            name,
            settings,
            registry,
        })
    }

    /// Load settings from a YAML or JSON file.
    ///
    /// Files ending in `.json` are parsed as JSON; anything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed or invalid.
    #[instrument(name = "config_load", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_file(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        registry: Arc<PluginRegistry>,
    ) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(Error::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&contents)?
        } else if contents.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(&contents)?
        };

        Self::new(name, settings, registry)
    }

    /// Same name and registry, different settings.
    ///
    /// Used when a persisted stack brings its own settings back.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings fail [`Settings::validate`].
    pub fn with_settings(&self, settings: Settings) -> Result<Self> {
        Self::new(self.name.clone(), settings, Arc::clone(&self.registry))
    }

    /// Config name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validated settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Plugin registry.
    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Construct and configure the storage backend the settings select.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginNotFound`] if no backend has that name, or the
    /// backend's own configuration error.
    pub fn storage(&self) -> Result<Box<dyn Storage>> {
        let mut storage = self.registry.storage(&self.settings.storage.name)?;
        storage.configure(&self.settings.storage.settings)?;
        Ok(storage)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn registry() -> Arc<PluginRegistry> {
        Arc::new(PluginRegistry::new())
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.verbosity, 2);
        assert_eq!(settings.retries, 120);
        assert_eq!(settings.delay(), Duration::from_secs(5));
        assert_eq!(settings.storage.name, "FileStorage");
        assert_eq!(settings.max_parallel, 1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_settings_keep_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"retries": 3, "storage": {"name": "MemoryStorage"}}"#)
                .unwrap();
        assert_eq!(settings.retries, 3);
        assert_eq!(settings.delay, 5);
        assert_eq!(settings.storage.name, "MemoryStorage");
        assert!(settings.storage.settings.is_empty());
    }

    #[test]
    fn test_validate_rejects_empty_storage_name() {
        let mut settings = Settings::default();
        settings.storage.name = "  ".to_string();
        assert!(matches!(settings.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_validate_stack_name_fmt() {
        let mut settings = Settings {
            stack_name_fmt: Some("{team}-{stack_name}".to_string()),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        settings.tags = Some(Tags::from([("team".to_string(), "infra".to_string())]));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "retries: 2\ndelay: 0\nstorage:\n  name: MemoryStorage").unwrap();

        let config = Config::from_file(file.path(), "test", registry()).unwrap();
        assert_eq!(config.name(), "test");
        assert_eq!(config.settings().retries, 2);
        assert_eq!(config.settings().delay, 0);
        assert_eq!(config.settings().storage.name, "MemoryStorage");
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"max_parallel": 4, "tags": {{"team": "infra"}}}}"#).unwrap();

        let config = Config::from_file(file.path(), "", registry()).unwrap();
        assert_eq!(config.settings().max_parallel, 4);
        assert_eq!(
            config.settings().tags.as_ref().and_then(|t| t.get("team")),
            Some(&"infra".to_string())
        );
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/nonexistent/shepherd.yml", "", registry()).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn test_with_settings_keeps_name() {
        let config = Config::new("prod", Settings::default(), registry()).unwrap();
        let rebound = config
            .with_settings(Settings {
                retries: 1,
                ..Settings::default()
            })
            .unwrap();
        assert_eq!(rebound.name(), "prod");
        assert_eq!(rebound.settings().retries, 1);
    }

    #[test]
    fn test_storage_plugin_missing() {
        let config = Config::new("", Settings::default(), registry()).unwrap();
        assert!(matches!(
            config.storage(),
            Err(Error::PluginNotFound { .. })
        ));
    }
}
