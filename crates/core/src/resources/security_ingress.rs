use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::network::{IngressRule, NetworkApi};
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceBase, ResourceRecord, merge_fields, read_fields};
use crate::stack::StackContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct IngressFields {
    #[serde(default)]
    group_name: Option<String>,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    src_security_group_name: Option<String>,
    #[serde(default)]
    src_group_id: Option<String>,
    #[serde(default)]
    cidr_ip: Option<String>,
    #[serde(default)]
    ip_protocol: Option<String>,
    #[serde(default)]
    from_port: Option<i64>,
    #[serde(default)]
    to_port: Option<i64>,
}

/// An ingress rule on a security group.
///
/// `group_name` and `src_security_group_name` may name security groups of the
/// same stack by local name, in which case the rule depends on them, or
/// groups that already exist with the provider.
pub struct SecurityGroupIngress {
    base: ResourceBase,
    fields: IngressFields,
    network: Arc<dyn NetworkApi>,
}

impl SecurityGroupIngress {
    /// Registry type key.
    pub const TYPE: &'static str = "SecurityGroupIngress";

    /// Empty rule talking to `network`.
    #[must_use]
    pub fn new(network: Arc<dyn NetworkApi>) -> Self {
        Self {
            base: ResourceBase::new("aws", Self::TYPE),
            fields: IngressFields::default(),
            network,
        }
    }

    /// Target group id, once resolved.
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        self.fields.group_id.as_deref()
    }

    /// Source group id, once resolved.
    #[must_use]
    pub fn src_group_id(&self) -> Option<&str> {
        self.fields.src_group_id.as_deref()
    }

    fn stack(&self) -> Result<Arc<StackContext>> {
        self.base.stack_context().ok_or_else(|| Error::MissingStack {
            local_name: self.base.local_name().to_string(),
        })
    }

    /// Provider id of a group named by local name within the stack, or by
    /// provider name.
    fn lookup_group(&self, stack: &StackContext, name: &str) -> Result<Option<String>> {
        let provider_name = if stack.get_resource_by_name(name).is_some() {
            stack.get_global_resource_name(name)
        } else {
            name.to_string()
        };
        Ok(self
            .network
            .security_group_by_name(&provider_name)?
            .map(|info| info.id))
    }

    /// Fill in group ids from names. Returns `false` if a named group does
    /// not exist.
    fn resolve_group_ids(&mut self) -> Result<bool> {
        let stack = self.stack()?;

        let group_name = self.fields.group_name.clone().filter(|_| self.fields.group_id.is_none());
        if let Some(name) = group_name {
            match self.lookup_group(&stack, &name)? {
                Some(id) => self.fields.group_id = Some(id),
                None => return Ok(false),
            }
        }

        let src_name = self
            .fields
            .src_security_group_name
            .clone()
            .filter(|_| self.fields.src_group_id.is_none());
        if let Some(name) = src_name {
            match self.lookup_group(&stack, &name)? {
                Some(id) => self.fields.src_group_id = Some(id),
                None => return Ok(false),
            }
        }

        Ok(true)
    }

    fn rule(&self) -> Result<IngressRule> {
        let group_id = self.fields.group_id.clone().ok_or_else(|| {
            Error::config(format!(
                "ingress rule '{}' needs group_name or group_id",
                self.base.local_name()
            ))
        })?;

        Ok(IngressRule {
            group_id,
            src_group_id: self.fields.src_group_id.clone(),
            cidr_ip: self.fields.cidr_ip.clone(),
            ip_protocol: self.fields.ip_protocol.clone(),
            from_port: self.fields.from_port,
            to_port: self.fields.to_port,
        })
    }
}

impl Resource for SecurityGroupIngress {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        Self::TYPE
    }

    fn get_dependencies(&self) -> Result<Vec<String>> {
        let stack = self.stack()?;
        let deps: Vec<String> = [&self.fields.group_name, &self.fields.src_security_group_name]
            .into_iter()
            .flatten()
            .filter(|name| stack.get_resource_by_name(name).is_some())
            .cloned()
            .collect();

        debug!(resource = %self.base.local_name(), dependencies = ?deps, "Security group ingress dependencies");
        Ok(deps)
    }

    fn provision(&mut self) -> Result<bool> {
        if !self.resolve_group_ids()? {
            return Err(Error::resource(
                self.base.local_name(),
                "security group for ingress rule not found",
            ));
        }

        let rule = self.rule()?;
        if self.network.authorize_ingress(&rule)? {
            info!(resource = %self.base.local_name(), group_id = %rule.group_id, "Ingress rule authorized");
        } else {
            debug!(resource = %self.base.local_name(), "Ingress rule already present");
        }
        Ok(true)
    }

    fn teardown(&mut self) -> Result<bool> {
        if !self.resolve_group_ids()? {
            warn!(resource = %self.base.local_name(), "Security group is gone, ingress rule went with it");
            return Ok(true);
        }

        let rule = self.rule()?;
        if self.network.security_group_by_id(&rule.group_id)?.is_none() {
            warn!(resource = %self.base.local_name(), group_id = %rule.group_id, "Security group is gone, ingress rule went with it");
            return Ok(true);
        }

        if self.network.revoke_ingress(&rule)? {
            info!(resource = %self.base.local_name(), group_id = %rule.group_id, "Ingress rule revoked");
        } else {
            warn!(resource = %self.base.local_name(), "Ingress rule was already absent");
        }
        Ok(true)
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

impl fmt::Debug for SecurityGroupIngress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityGroupIngress")
            .field("base", &self.base)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Settings, StorageSettings};
    use crate::plugins::PluginRegistry;
    use crate::resources::SecurityGroup;
    use crate::resources::network::SimulatedNetwork;
    use crate::stack::Stack;
    use serde_json::json;

    fn stack() -> Stack {
        let settings = Settings {
            retries: 0,
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

    fn ingress(network: &SimulatedNetwork, record: serde_json::Value) -> Box<dyn Resource> {
        let mut ingress = SecurityGroupIngress::new(Arc::new(network.clone()));
        let record: ResourceRecord = serde_json::from_value(record).unwrap();
        ingress.deserialize(&record).unwrap();
        Box::new(ingress)
    }

    fn group(network: &SimulatedNetwork, name: &str) -> Box<dyn Resource> {
        let mut group = SecurityGroup::new(Arc::new(network.clone()));
        group.base_mut().set_local_name(name);
        Box::new(group)
    }

    #[test]
    fn test_dependencies_only_name_stack_members() {
        let network = SimulatedNetwork::new();
        let stack = stack();
        stack.add_resource(group(&network, "web")).unwrap();
        let rule = stack
            .add_resource(ingress(
                &network,
                json!({
                    "local_name": "ssh",
                    "group_name": "web",
                    "src_security_group_name": "corp-admin",
                }),
            ))
            .unwrap();

        assert_eq!(rule.read().get_dependencies().unwrap(), vec!["web"]);
    }

    #[test]
    fn test_authorize_and_revoke() {
        let network = SimulatedNetwork::new();
        let stack = stack();
        let web = stack.add_resource(group(&network, "web")).unwrap();
        let admin = network.create_security_group("corp-admin", "").unwrap();
        let rule = stack
            .add_resource(ingress(
                &network,
                json!({
                    "local_name": "ssh",
                    "group_name": "web",
                    "src_security_group_name": "corp-admin",
                    "ip_protocol": "tcp",
                    "from_port": 22,
                    "to_port": 22,
                }),
            ))
            .unwrap();

        web.write().create().unwrap();
        assert!(rule.write().create().unwrap());

        let web_id = web.read().resource_id().unwrap();
        assert!(rule.read().base().available());
        let rules = network.rules(&web_id);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].src_group_id.as_deref(), Some(admin.as_str()));
        assert_eq!(rules[0].from_port, Some(22));

        assert!(rule.write().destroy().unwrap());
        assert!(network.rules(&web_id).is_empty());
    }

    #[test]
    fn test_revoke_after_group_deleted() {
        let network = SimulatedNetwork::new();
        let stack = stack();
        let web = stack.add_resource(group(&network, "web")).unwrap();
        let rule = stack
            .add_resource(ingress(
                &network,
                json!({"local_name": "https", "group_name": "web", "cidr_ip": "0.0.0.0/0"}),
            ))
            .unwrap();
        web.write().create().unwrap();
        rule.write().create().unwrap();

        let web_id = web.read().resource_id().unwrap();
        network.delete_security_group(&web_id).unwrap();

        assert!(rule.write().destroy().unwrap());
        assert_eq!(network.calls(crate::resources::NetworkOperation::RevokeIngress), 0);
    }

    #[test]
    fn test_missing_group_is_retryable() {
        let network = SimulatedNetwork::new();
        let stack = stack();
        let rule = stack
            .add_resource(ingress(
                &network,
                json!({"local_name": "ssh", "group_name": "nowhere"}),
            ))
            .unwrap();

        let err = rule.write().create().unwrap_err();
        assert!(!err.is_fatal());
        assert!(!rule.read().base().available());
    }

    #[test]
    fn test_rule_without_group_is_config_error() {
        let network = SimulatedNetwork::new();
        let stack = stack();
        let rule = stack
            .add_resource(ingress(&network, json!({"local_name": "open", "cidr_ip": "0.0.0.0/0"})))
            .unwrap();

        let err = rule.write().create().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_record_round_trip() {
        let network = SimulatedNetwork::new();
        let record: ResourceRecord = serde_json::from_value(json!({
            "local_name": "ssh",
            "type": "SecurityGroupIngress",
            "provider": "aws",
            "group_name": "web",
            "group_id": "sg-0000aaaa",
            "cidr_ip": "10.0.0.0/8",
            "ip_protocol": "tcp",
            "from_port": 22,
            "to_port": 22,
        }))
        .unwrap();

        let mut rule = SecurityGroupIngress::new(Arc::new(network.clone()));
        rule.deserialize(&record).unwrap();
        assert_eq!(rule.group_id(), Some("sg-0000aaaa"));

        let mut again = SecurityGroupIngress::new(Arc::new(network));
        again.deserialize(&rule.serialize().unwrap()).unwrap();
        assert_eq!(again.fields, rule.fields);
        assert_eq!(again.base().tags(), rule.base().tags());
    }
}
