//! Manifest loading: where a new stack's resource records come from.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::resource::{ResourceRecord, normalize_record};

/// Keys every manifest record must carry.
pub const REQUIRED_KEYS: [&str; 3] = ["local_name", "type", "provider"];

/// Source of resource records for [`Stack::make`](crate::Stack::make).
pub trait ManifestLoader {
    /// Load the records.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read or are malformed.
    fn load(&self, config: &Config) -> Result<Vec<ResourceRecord>>;
}

/// Records already in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticManifest {
    records: Vec<ResourceRecord>,
}

impl StaticManifest {
    /// Manifest over the given records.
    #[must_use]
    pub const fn new(records: Vec<ResourceRecord>) -> Self {
        Self { records }
    }
}

impl ManifestLoader for StaticManifest {
    fn load(&self, _config: &Config) -> Result<Vec<ResourceRecord>> {
        validate_records(&self.records)?;
        Ok(self.records.clone())
    }
}

/// Records read from a YAML or JSON file.
///
/// The file holds either a list of records or a map with a `resources` list.
#[derive(Debug, Clone, Default)]
pub struct FileManifest {
    path: Option<PathBuf>,
}

impl FileManifest {
    /// Manifest at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Manifest at the config's `manifest_path`.
    #[must_use]
    pub const fn from_settings() -> Self {
        Self { path: None }
    }

    fn resolve(&self, config: &Config) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None if !config.settings().manifest_path.is_empty() => {
                Ok(PathBuf::from(&config.settings().manifest_path))
            }
            None => Err(Error::config("no manifest path given and settings.manifest_path is empty")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestDocument {
    List(Vec<ResourceRecord>),
    Wrapped { resources: Vec<ResourceRecord> },
}

impl ManifestLoader for FileManifest {
    #[instrument(name = "manifest_load", skip_all)]
    fn load(&self, config: &Config) -> Result<Vec<ResourceRecord>> {
        let path = self.resolve(config)?;
        let records = parse_manifest(&path)?;
        validate_records(&records)?;
        debug!(path = %path.display(), records = records.len(), "Loaded manifest");
        Ok(records)
    }
}

fn parse_manifest(path: &Path) -> Result<Vec<ResourceRecord>> {
    if !path.exists() {
        return Err(Error::config(format!("manifest not found: {}", path.display())));
    }

    let contents = std::fs::read_to_string(path)?;
    let document: ManifestDocument = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&contents)?
    } else {
        serde_yaml::from_str(&contents)?
    };

    Ok(match document {
        ManifestDocument::List(records) | ManifestDocument::Wrapped { resources: records } => records,
    })
}

/// Check every record names itself, its type and its provider.
///
/// # Errors
///
/// Returns [`Error::Config`] naming the first offending record.
pub fn validate_records(records: &[ResourceRecord]) -> Result<()> {
    for (index, record) in records.iter().enumerate() {
        let normalized = normalize_record(record);
        for key in REQUIRED_KEYS {
            let present = normalized
                .get(key)
                .and_then(serde_json::Value::as_str)
                .is_some_and(|value| !value.is_empty());
            if !present {
                return Err(Error::config(format!(
                    "manifest record {index} is missing '{key}'"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::plugins::PluginRegistry;
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;

    fn config() -> Config {
        Config::new("", Settings::default(), Arc::new(PluginRegistry::new())).unwrap()
    }

    fn record(value: serde_json::Value) -> ResourceRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_static_manifest() {
        let manifest = StaticManifest::new(vec![record(
            json!({"local_name": "a", "type": "SecurityGroup", "provider": "aws"}),
        )]);
        assert_eq!(manifest.load(&config()).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_required_key() {
        let manifest = StaticManifest::new(vec![record(json!({"local_name": "a", "type": "X"}))]);
        let err = manifest.load(&config()).unwrap_err();
        assert!(err.to_string().contains("provider"));
    }

    #[test]
    fn test_yaml_list() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            "- local_name: web\n  type: SecurityGroup\n  provider: aws\n  group_description: web tier"
        )
        .unwrap();

        let records = FileManifest::new(file.path()).load(&config()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["group_description"], json!("web tier"));
    }

    #[test]
    fn test_json_wrapped() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"resources": [{{"local_name": "web", "type": "SecurityGroup", "provider": "aws"}}]}}"#
        )
        .unwrap();

        assert_eq!(FileManifest::new(file.path()).load(&config()).unwrap().len(), 1);
    }

    #[test]
    fn test_path_from_settings_required() {
        assert!(matches!(
            FileManifest::from_settings().load(&config()),
            Err(Error::Config { .. })
        ));
    }
}
