//! Security group operations, as a trait, plus an in-process provider.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::Tags;
use crate::error::{Error, Result};

/// Provider calls, used to count invocations and inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkOperation {
    /// Create a security group
    CreateSecurityGroup,
    /// Look up a security group by id or name
    DescribeSecurityGroups,
    /// Delete a security group
    DeleteSecurityGroup,
    /// Set tags on a security group
    CreateTags,
    /// Read tags of a security group
    DescribeTags,
    /// Add an ingress rule
    AuthorizeIngress,
    /// Remove an ingress rule
    RevokeIngress,
}

impl fmt::Display for NetworkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateSecurityGroup => "CreateSecurityGroup",
            Self::DescribeSecurityGroups => "DescribeSecurityGroups",
            Self::DeleteSecurityGroup => "DeleteSecurityGroup",
            Self::CreateTags => "CreateTags",
            Self::DescribeTags => "DescribeTags",
            Self::AuthorizeIngress => "AuthorizeSecurityGroupIngress",
            Self::RevokeIngress => "RevokeSecurityGroupIngress",
        };
        f.write_str(name)
    }
}

/// A security group as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupInfo {
    /// Provider-assigned id, e.g. `sg-1a2b3c4d`
    pub id: String,
    /// Group name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// Tags on the group
    pub tags: Tags,
}

/// One ingress permission on a security group.
///
/// A rule admits traffic from a source group, a CIDR block, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IngressRule {
    /// Group the rule is attached to
    pub group_id: String,
    /// Source group allowed in
    pub src_group_id: Option<String>,
    /// Source address range allowed in
    pub cidr_ip: Option<String>,
    /// Protocol, e.g. `tcp` or `-1` for all
    pub ip_protocol: Option<String>,
    /// First port of the range
    pub from_port: Option<i64>,
    /// Last port of the range
    pub to_port: Option<i64>,
}

/// Security group operations of a cloud network provider.
///
/// Provider failures are reported as [`Error::Resource`], which the executor
/// retries.
pub trait NetworkApi: Send + Sync + fmt::Debug {
    /// Create a group and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if a group with that name already exists.
    fn create_security_group(&self, name: &str, description: &str) -> Result<String>;

    /// The group with this id, if the provider can see it.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be queried.
    fn security_group_by_id(&self, group_id: &str) -> Result<Option<SecurityGroupInfo>>;

    /// The group with this name, if the provider can see it.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be queried.
    fn security_group_by_name(&self, name: &str) -> Result<Option<SecurityGroupInfo>>;

    /// Delete a group. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if another group's rules still reference it.
    fn delete_security_group(&self, group_id: &str) -> Result<bool>;

    /// Add or overwrite tags on a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the group is not visible.
    fn create_tags(&self, group_id: &str, tags: &Tags) -> Result<()>;

    /// Tags currently on a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the group is not visible.
    fn get_tags(&self, group_id: &str) -> Result<Tags>;

    /// Add a rule. Returns `false` if an identical rule was already present.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced group does not exist.
    fn authorize_ingress(&self, rule: &IngressRule) -> Result<bool>;

    /// Remove a rule. Returns `false` if no such rule was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the group does not exist.
    fn revoke_ingress(&self, rule: &IngressRule) -> Result<bool>;
}

#[derive(Debug)]
struct GroupEntry {
    info: SecurityGroupInfo,
    rules: BTreeSet<IngressRule>,
    hidden_for: u32,
}

#[derive(Debug, Default)]
struct NetworkState {
    groups: BTreeMap<String, GroupEntry>,
    failures: HashMap<NetworkOperation, u32>,
    calls: HashMap<NetworkOperation, u32>,
    visibility_delay: u32,
}

impl NetworkState {
    fn enter(&mut self, op: NetworkOperation) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(remaining) = self.failures.get_mut(&op).filter(|n| **n > 0) {
            *remaining -= 1;
            debug!(operation = %op, remaining = *remaining, "Injected provider failure");
            return Err(Error::resource("network", format!("{op} failed (injected)")));
        }
        trace!(operation = %op, "Provider call");
        Ok(())
    }

    /// A visible group. Lookups of a freshly created group count down its
    /// visibility delay.
    fn visible(&mut self, group_id: &str) -> Option<&mut GroupEntry> {
        let entry = self.groups.get_mut(group_id)?;
        if entry.hidden_for > 0 {
            entry.hidden_for -= 1;
            return None;
        }
        Some(entry)
    }

    fn require(&mut self, group_id: &str) -> Result<&mut GroupEntry> {
        self.visible(group_id).ok_or_else(|| {
            Error::resource("network", format!("security group {group_id} not found"))
        })
    }
}

/// Thread-safe in-memory network provider.
///
/// Clones share state. Failures can be injected per operation, and newly
/// created groups can be kept invisible for a number of lookups to mimic
/// eventual consistency.
#[derive(Debug, Clone, Default)]
pub struct SimulatedNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl SimulatedNetwork {
    /// Empty network with immediate visibility.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// New groups stay invisible for this many lookups.
    #[must_use]
    pub fn with_visibility_delay(self, lookups: u32) -> Self {
        self.state.lock().visibility_delay = lookups;
        self
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: NetworkOperation, times: u32) {
        self.state.lock().failures.insert(op, times);
    }

    /// How many times `op` has been called, failures included.
    #[must_use]
    pub fn calls(&self, op: NetworkOperation) -> u32 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of existing groups, visible or not.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    /// Rules attached to a group, ignoring visibility.
    #[must_use]
    pub fn rules(&self, group_id: &str) -> Vec<IngressRule> {
        self.state
            .lock()
            .groups
            .get(group_id)
            .map(|entry| entry.rules.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl NetworkApi for SimulatedNetwork {
    fn create_security_group(&self, name: &str, description: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.enter(NetworkOperation::CreateSecurityGroup)?;

        if state.groups.values().any(|entry| entry.info.name == name) {
            return Err(Error::resource(
                "network",
                format!("security group '{name}' already exists"),
            ));
        }

        let simple = Uuid::new_v4().simple().to_string();
        let id = format!("sg-{}", &simple[..8]);
        let hidden_for = state.visibility_delay;
        state.groups.insert(
            id.clone(),
            GroupEntry {
                info: SecurityGroupInfo {
                    id: id.clone(),
                    name: name.to_string(),
                    description: description.to_string(),
                    tags: Tags::new(),
                },
                rules: BTreeSet::new(),
                hidden_for,
            },
        );
        debug!(group_id = %id, name, "Created security group");
        Ok(id)
    }

    fn security_group_by_id(&self, group_id: &str) -> Result<Option<SecurityGroupInfo>> {
        let mut state = self.state.lock();
        state.enter(NetworkOperation::DescribeSecurityGroups)?;
        Ok(state.visible(group_id).map(|entry| entry.info.clone()))
    }

    fn security_group_by_name(&self, name: &str) -> Result<Option<SecurityGroupInfo>> {
        let mut state = self.state.lock();
        state.enter(NetworkOperation::DescribeSecurityGroups)?;
        let id = state
            .groups
            .values()
            .find(|entry| entry.info.name == name)
            .map(|entry| entry.info.id.clone());
        Ok(id.and_then(|id| state.visible(&id).map(|entry| entry.info.clone())))
    }

    fn delete_security_group(&self, group_id: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.enter(NetworkOperation::DeleteSecurityGroup)?;

        if !state.groups.contains_key(group_id) {
            return Ok(false);
        }

        let referenced_by = state
            .groups
            .values()
            .filter(|entry| entry.info.id != group_id)
            .find(|entry| {
                entry
                    .rules
                    .iter()
                    .any(|rule| rule.src_group_id.as_deref() == Some(group_id))
            })
            .map(|entry| entry.info.id.clone());
        if let Some(other) = referenced_by {
            return Err(Error::resource(
                "network",
                format!("security group {group_id} is still referenced by {other}"),
            ));
        }

        state.groups.remove(group_id);
        debug!(group_id, "Deleted security group");
        Ok(true)
    }

    fn create_tags(&self, group_id: &str, tags: &Tags) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(NetworkOperation::CreateTags)?;
        let entry = state.require(group_id)?;
        entry
            .info
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn get_tags(&self, group_id: &str) -> Result<Tags> {
        let mut state = self.state.lock();
        state.enter(NetworkOperation::DescribeTags)?;
        Ok(state.require(group_id)?.info.tags.clone())
    }

    fn authorize_ingress(&self, rule: &IngressRule) -> Result<bool> {
        let mut state = self.state.lock();
        state.enter(NetworkOperation::AuthorizeIngress)?;

        if let Some(src) = &rule.src_group_id {
            state.require(src)?;
        }
        let entry = state.require(&rule.group_id)?;
        Ok(entry.rules.insert(rule.clone()))
    }

    fn revoke_ingress(&self, rule: &IngressRule) -> Result<bool> {
        let mut state = self.state.lock();
        state.enter(NetworkOperation::RevokeIngress)?;
        let entry = state.require(&rule.group_id)?;
        Ok(entry.rules.remove(rule))
    }
}
