//! One JSON document per stack, in a directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Storage, StorageOptions};
use crate::error::{Error, Result};
use crate::stack::StackRecord;
use crate::{Tags, tags_match};

/// Directory used when `storage.settings.path` is not set.
pub const DEFAULT_STACK_DIR: &str = ".shepherd/stacks";

/// Stacks stored as pretty-printed JSON files named after their global name.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so readers never see a partial document.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new(DEFAULT_STACK_DIR)
    }
}

impl FileStorage {
    /// Storage rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Directory holding the stack files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(Error::config(format!("invalid stack name for file storage: '{name}'")));
        }
        Ok(self.root.join(format!("{name}.json")))
    }

    fn read_record(path: &Path) -> Result<Option<StackRecord>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl Storage for FileStorage {
    fn configure(&mut self, settings: &StorageOptions) -> Result<()> {
        match settings.get("path") {
            None => {}
            Some(serde_json::Value::String(path)) if !path.is_empty() => {
                self.root = PathBuf::from(path);
            }
            Some(other) => {
                return Err(Error::config(format!(
                    "storage.settings.path must be a non-empty string, got {other}"
                )));
            }
        }
        debug!(root = %self.root.display(), "Configured file storage");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<StackRecord>> {
        Self::read_record(&self.path_for(name)?)
    }

    fn dump(&self, record: &StackRecord) -> Result<()> {
        let path = self.path_for(&record.global_name)?;
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(record)?;

        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.root)?;
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), "Wrote stack");
        Ok(())
    }

    fn search(&self, tags: &Tags) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(Some(record)) if tags_match(&record.tags, tags) => names.push(record.global_name),
                Ok(_) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable stack file"),
            }
        }

        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use tempfile::TempDir;

    fn record(name: &str, env: &str) -> StackRecord {
        StackRecord {
            local_name: name.to_string(),
            global_name: format!("{name}_2024-01-01-00-00-00"),
            config_name: "test".to_string(),
            settings: Settings::default(),
            tags: Tags::from([
                ("stack_name".to_string(), name.to_string()),
                ("env".to_string(), env.to_string()),
            ]),
            resources: Vec::new(),
        }
    }

    fn storage(dir: &TempDir) -> FileStorage {
        let mut storage = FileStorage::default();
        let mut options = StorageOptions::new();
        options.insert(
            "path".to_string(),
            serde_json::Value::String(dir.path().join("stacks").display().to_string()),
        );
        storage.configure(&options).unwrap();
        storage
    }

    #[test]
    fn test_default_root() {
        assert_eq!(FileStorage::default().root(), Path::new(DEFAULT_STACK_DIR));
    }

    #[test]
    fn test_dump_then_load() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let stack = record("web", "prod");

        assert!(storage.load(&stack.global_name).unwrap().is_none());
        storage.dump(&stack).unwrap();
        assert_eq!(storage.load(&stack.global_name).unwrap(), Some(stack.clone()));

        let leftovers: Vec<_> = fs::read_dir(storage.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_search_by_tags() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.dump(&record("web", "prod")).unwrap();
        storage.dump(&record("db", "prod")).unwrap();
        storage.dump(&record("scratch", "dev")).unwrap();
        fs::write(storage.root().join("notes.txt"), "ignored").unwrap();

        let prod = Tags::from([("env".to_string(), "prod".to_string())]);
        assert_eq!(
            storage.search(&prod).unwrap(),
            vec!["db_2024-01-01-00-00-00", "web_2024-01-01-00-00-00"]
        );
        assert_eq!(storage.search(&Tags::new()).unwrap().len(), 3);
    }

    #[test]
    fn test_search_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(storage(&dir).search(&Tags::new()).unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let stack = record("web", "prod");
        storage.dump(&stack).unwrap();

        assert!(storage.delete(&stack.global_name).unwrap());
        assert!(!storage.delete(&stack.global_name).unwrap());
    }

    #[test]
    fn test_rejects_path_names() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            storage(&dir).load("../escape"),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_configure_rejects_bad_path() {
        let mut storage = FileStorage::default();
        let mut options = StorageOptions::new();
        options.insert("path".to_string(), serde_json::json!(42));
        assert!(storage.configure(&options).is_err());
    }
}
