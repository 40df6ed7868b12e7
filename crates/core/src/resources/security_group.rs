use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shepherd_task_graph::{Task, run_tasks};
use tracing::{debug, error, info, warn};

use super::network::NetworkApi;
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceBase, ResourceRecord, merge_fields, read_fields};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SecurityGroupFields {
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    group_description: Option<String>,
}

/// A network security group.
///
/// Creation is three provider steps run as their own task graph: the group
/// is created once, then tagging and the existence check each retry with the
/// stack's retry policy until the provider sees the new group.
pub struct SecurityGroup {
    base: ResourceBase,
    fields: SecurityGroupFields,
    network: Arc<dyn NetworkApi>,
}

impl SecurityGroup {
    /// Registry type key.
    pub const TYPE: &'static str = "SecurityGroup";

    /// Empty group talking to `network`.
    #[must_use]
    pub fn new(network: Arc<dyn NetworkApi>) -> Self {
        Self {
            base: ResourceBase::new("aws", Self::TYPE),
            fields: SecurityGroupFields::default(),
            network,
        }
    }

    /// Provider id, once created.
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        self.fields.group_id.as_deref()
    }

    /// Description given to the provider.
    #[must_use]
    pub fn group_description(&self) -> Option<&str> {
        self.fields.group_description.as_deref()
    }

    fn missing_id(&self) -> Error {
        Error::resource(self.base.local_name(), "security group has no id")
    }

    fn create_group(&mut self, global_name: &str) -> Result<bool> {
        if self.fields.group_id.is_some() {
            return Ok(true);
        }

        debug!(resource = %self.base.local_name(), name = global_name, "Requesting security group");
        let description = self.fields.group_description.clone().unwrap_or_default();
        let id = self.network.create_security_group(global_name, &description)?;
        self.base.set_global_name(global_name);
        self.fields.group_id = Some(id);
        Ok(true)
    }

    fn apply_tags(&self) -> Result<bool> {
        let id = self.group_id().ok_or_else(|| self.missing_id())?;
        self.network.create_tags(id, self.base.tags())?;
        Ok(true)
    }

    fn check_created(&self) -> Result<bool> {
        let id = self.group_id().ok_or_else(|| self.missing_id())?;
        let found = self.network.security_group_by_id(id)?.is_some();
        if found {
            info!(resource = %self.base.local_name(), group_id = id, "Security group is now available");
        }
        Ok(found)
    }
}

impl Resource for SecurityGroup {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        Self::TYPE
    }

    fn resource_id(&self) -> Option<String> {
        self.fields.group_id.clone()
    }

    fn get_dependencies(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn provision(&mut self) -> Result<bool> {
        let stack = self.base.stack_context().ok_or_else(|| Error::MissingStack {
            local_name: self.base.local_name().to_string(),
        })?;
        let retries = stack.settings().retries;
        let delay = stack.settings().delay();
        let global_name = stack.get_global_resource_name(self.base.local_name());
        let local_name = self.base.local_name().to_string();

        let this = Mutex::new(&mut *self);
        let this = &this;
        let global_name = global_name.as_str();
        let report = run_tasks(vec![
            Task::new("create", move || {
                this.lock()
                    .create_group(global_name)
                    .map_err(Error::into_task_error)
            }),
            Task::new("tag", move || {
                this.lock().apply_tags().map_err(Error::into_task_error)
            })
            .depends_on(["create"])
            .retries(retries)
            .delay(delay),
            Task::new("check", move || {
                this.lock().check_created().map_err(Error::into_task_error)
            })
            .depends_on(["create"])
            .retries(retries)
            .delay(delay),
        ]);

        if report.passed() {
            Ok(true)
        } else {
            error!(resource = %local_name, failed = ?report.failed(), "Failed to provision security group");
            Ok(false)
        }
    }

    fn teardown(&mut self) -> Result<bool> {
        let existing = match self.group_id() {
            Some(id) => self.network.security_group_by_id(id)?.map(|info| info.id),
            None => None,
        };

        match existing {
            Some(id) => {
                if self.network.delete_security_group(&id)? {
                    info!(resource = %self.base.local_name(), group_id = %id, "Security group destroyed");
                } else {
                    warn!(resource = %self.base.local_name(), group_id = %id, "Security group no longer exists, skipping");
                }
            }
            None => {
                warn!(resource = %self.base.local_name(), "Security group does not exist anymore, marking unavailable");
            }
        }

        self.fields.group_id = None;
        Ok(true)
    }

    fn sync(&mut self) -> Result<()> {
        let Some(id) = self.fields.group_id.clone() else {
            return Ok(());
        };

        match self.network.security_group_by_id(&id)? {
            Some(_) => {
                let tags = self.network.get_tags(&id)?;
                self.base.tags_mut().extend(tags);
                self.base.set_available(true);
            }
            None => {
                warn!(resource = %self.base.local_name(), group_id = %id, "Security group not found during sync");
                self.base.set_available(false);
            }
        }
        Ok(())
    }

    fn serialize_fields(&self) -> Result<ResourceRecord> {
        let mut record = ResourceRecord::new();
        merge_fields(&mut record, &self.fields)?;
        Ok(record)
    }

    fn deserialize_fields(&mut self, record: &ResourceRecord) -> Result<()> {
        self.fields = read_fields(record)?;
        Ok(())
    }
}

impl fmt::Debug for SecurityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityGroup")
            .field("base", &self.base)
            .field("group_id", &self.fields.group_id)
            .field("group_description", &self.fields.group_description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Settings, StorageSettings};
    use crate::plugins::PluginRegistry;
    use crate::resources::network::{NetworkOperation, SimulatedNetwork};
    use crate::stack::Stack;
    use serde_json::json;

    fn stack(retries: u32) -> Stack {
        let settings = Settings {
            retries,
            delay: 0,
            storage: StorageSettings {
                name: "MemoryStorage".to_string(),
                ..StorageSettings::default()
            },
            ..Settings::default()
        };
        let config = Config::new("unit", settings, Arc::new(PluginRegistry::new())).unwrap();
        Stack::new("net", &config).unwrap()
    }

    fn group(network: &SimulatedNetwork, name: &str) -> Box<dyn Resource> {
        let mut group = SecurityGroup::new(Arc::new(network.clone()));
        group.base_mut().set_local_name(name);
        group.fields.group_description = Some(format!("{name} group"));
        Box::new(group)
    }

    #[test]
    fn test_create_tags_and_checks() {
        let network = SimulatedNetwork::new();
        let stack = stack(0);
        let shared = stack.add_resource(group(&network, "web")).unwrap();

        assert!(shared.write().create().unwrap());

        let resource = shared.read();
        let id = resource.resource_id().unwrap();
        let info = network.security_group_by_id(&id).unwrap().unwrap();
        assert_eq!(info.name, stack.get_global_resource_name("web"));
        assert_eq!(info.description, "web group");
        assert_eq!(info.tags["stack_name"], "net");
        assert!(resource.base().available());
    }

    #[test]
    fn test_check_retries_until_visible() {
        let network = SimulatedNetwork::new().with_visibility_delay(3);
        let stack = stack(5);
        let shared = stack.add_resource(group(&network, "web")).unwrap();

        assert!(shared.write().create().unwrap());
        assert_eq!(network.calls(NetworkOperation::CreateSecurityGroup), 1);
    }

    #[test]
    fn test_create_reports_failure_after_retries() {
        let network = SimulatedNetwork::new().with_visibility_delay(100);
        let stack = stack(1);
        let shared = stack.add_resource(group(&network, "web")).unwrap();

        assert!(!shared.write().create().unwrap());
        assert!(!shared.read().base().available());
        assert!(shared.read().resource_id().is_some());
    }

    #[test]
    fn test_destroy_clears_id() {
        let network = SimulatedNetwork::new();
        let stack = stack(0);
        let shared = stack.add_resource(group(&network, "web")).unwrap();
        shared.write().create().unwrap();

        assert!(shared.write().destroy().unwrap());
        assert!(shared.read().resource_id().is_none());
        assert_eq!(network.group_count(), 0);
    }

    #[test]
    fn test_destroy_tolerates_missing_group() {
        let network = SimulatedNetwork::new();
        let stack = stack(0);
        let shared = stack.add_resource(group(&network, "web")).unwrap();
        shared.write().create().unwrap();

        let id = shared.read().resource_id().unwrap();
        network.delete_security_group(&id).unwrap();

        assert!(shared.write().destroy().unwrap());
        assert!(!shared.read().base().available());
    }

    #[test]
    fn test_sync_marks_missing_group_unavailable() {
        let network = SimulatedNetwork::new();
        let stack = stack(0);
        let shared = stack.add_resource(group(&network, "web")).unwrap();
        shared.write().create().unwrap();

        let id = shared.read().resource_id().unwrap();
        network
            .create_tags(&id, &crate::Tags::from([("owner".to_string(), "ops".to_string())]))
            .unwrap();
        shared.write().sync().unwrap();
        assert_eq!(shared.read().base().tags()["owner"], "ops");
        assert_eq!(network.calls(NetworkOperation::DescribeTags), 1);

        network.delete_security_group(&id).unwrap();
        shared.write().sync().unwrap();
        assert!(!shared.read().base().available());
    }

    #[test]
    fn test_record_fields() {
        let network = SimulatedNetwork::new();
        let mut group = SecurityGroup::new(Arc::new(network));
        let record: ResourceRecord = serde_json::from_value(json!({
            "local_name": "web",
            "type": "SecurityGroup",
            "provider": "aws",
            "group_description": "web tier",
            "group_id": "sg-12345678",
        }))
        .unwrap();

        group.deserialize(&record).unwrap();
        assert_eq!(group.group_id(), Some("sg-12345678"));
        assert_eq!(group.group_description(), Some("web tier"));

        let out = group.serialize().unwrap();
        assert_eq!(out["group_id"], json!("sg-12345678"));
        assert_eq!(out["type"], json!("SecurityGroup"));
    }
}
