//! Resource lifecycle: shared fields, the [`Resource`] trait and its
//! availability guard.
//!
//! A resource becomes available only through a successful
//! [`Resource::create`], and unavailable only through a successful
//! [`Resource::destroy`]. Both are no-ops when the resource is already in the
//! requested state, and both refuse to run on a resource that is not
//! attached to a stack.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Tags;
use crate::error::{Error, Result};
use crate::stack::StackContext;

/// Flat key/value form of a resource, as found in manifests and storage.
pub type ResourceRecord = serde_json::Map<String, serde_json::Value>;

/// A resource shared between its stack and the tasks operating on it.
pub type SharedResource = Arc<RwLock<Box<dyn Resource>>>;

/// Where a resource is in its lifecycle.
///
/// At rest a resource is either [`Available`](Self::Available) or not; the
/// pending states only exist while a create or destroy is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    /// Never created, or state not known
    #[default]
    Unknown,
    /// Create in progress
    PendingCreate,
    /// Created and confirmed
    Available,
    /// Destroy in progress
    PendingDestroy,
    /// Torn down
    Destroyed,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::PendingCreate => write!(f, "pending-create"),
            Self::Available => write!(f, "available"),
            Self::PendingDestroy => write!(f, "pending-destroy"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Non-owning handle from a resource back to its stack.
#[derive(Clone, Default)]
pub struct StackRef(Weak<StackContext>);

impl StackRef {
    pub(crate) fn new(context: &Arc<StackContext>) -> Self {
        Self(Arc::downgrade(context))
    }

    /// The stack, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<StackContext>> {
        self.0.upgrade()
    }
}

impl fmt::Debug for StackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(stack) => f.debug_tuple("StackRef").field(&stack.global_name()).finish(),
            None => f.write_str("StackRef(detached)"),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BaseRecord {
    #[serde(default)]
    local_name: Option<String>,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    available: Option<bool>,
    #[serde(default)]
    tags: Option<Tags>,
}

/// Fields every resource carries.
#[derive(Debug, Clone, Default)]
pub struct ResourceBase {
    local_name: String,
    global_name: String,
    provider: String,
    kind: String,
    available: bool,
    tags: Tags,
    state: ResourceState,
    stack: Option<StackRef>,
}

impl ResourceBase {
    /// Empty base for a provider and type.
    pub fn new(provider: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Name unique within the stack.
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Set the local name.
    pub fn set_local_name(&mut self, name: impl Into<String>) {
        self.local_name = name.into();
    }

    /// Name used with the provider.
    #[must_use]
    pub fn global_name(&self) -> &str {
        &self.global_name
    }

    /// Set the provider-facing name.
    pub fn set_global_name(&mut self, name: impl Into<String>) {
        self.global_name = name.into();
    }

    /// Provider, e.g. `aws`.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Type discriminator as recorded.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether the resource exists and is confirmed usable.
    #[must_use]
    pub const fn available(&self) -> bool {
        self.available
    }

    /// Record availability observed by a sync.
    ///
    /// Create and destroy manage availability themselves; this is for
    /// reconciling with what the provider reports.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
        self.state = if available {
            ResourceState::Available
        } else {
            ResourceState::Unknown
        };
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ResourceState {
        self.state
    }

    /// Tags.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Mutable tags.
    pub fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }

    /// Back-reference to the owning stack.
    #[must_use]
    pub const fn stack(&self) -> Option<&StackRef> {
        self.stack.as_ref()
    }

    /// The owning stack, if attached and still alive.
    #[must_use]
    pub fn stack_context(&self) -> Option<Arc<StackContext>> {
        self.stack.as_ref().and_then(StackRef::upgrade)
    }

    pub(crate) fn set_stack(&mut self, stack: StackRef) {
        self.stack = Some(stack);
    }

    fn write_record(&self, record: &mut ResourceRecord) -> Result<()> {
        let base = BaseRecord {
            local_name: Some(self.local_name.clone()),
            global_name: Some(self.global_name.clone()),
            provider: Some(self.provider.clone()),
            kind: Some(self.kind.clone()),
            available: Some(self.available),
            tags: Some(self.tags.clone()),
        };
        merge_fields(record, &base)
    }

    fn read_record(&mut self, record: &ResourceRecord) -> Result<()> {
        let base: BaseRecord = read_fields(record)?;
        if let Some(local_name) = base.local_name {
            self.local_name = local_name;
        }
        if let Some(global_name) = base.global_name {
            self.global_name = global_name;
        }
        if let Some(provider) = base.provider {
            self.provider = provider;
        }
        if let Some(kind) = base.kind {
            self.kind = kind;
        }
        if let Some(available) = base.available {
            self.available = available;
            self.state = if available {
                ResourceState::Available
            } else {
                ResourceState::Unknown
            };
        }
        if let Some(tags) = base.tags {
            self.tags = tags;
        }
        Ok(())
    }
}

/// Lower-case every key so records match fields regardless of case.
#[must_use]
pub fn normalize_record(record: &ResourceRecord) -> ResourceRecord {
    record
        .iter()
        .map(|(key, value)| (key.to_lowercase(), value.clone()))
        .collect()
}

/// Read a field struct out of a record. Unknown keys are ignored.
///
/// # Errors
///
/// Returns [`Error::Config`] if a known key holds a value of the wrong shape.
pub fn read_fields<T: DeserializeOwned>(record: &ResourceRecord) -> Result<T> {
    let normalized = serde_json::Value::Object(normalize_record(record));
    serde_json::from_value(normalized).map_err(|e| Error::config(format!("invalid resource record: {e}")))
}

/// Write a field struct's keys into a record.
///
/// # Errors
///
/// Returns an error if `fields` does not serialize to a JSON object.
pub fn merge_fields<T: Serialize>(record: &mut ResourceRecord, fields: &T) -> Result<()> {
    match serde_json::to_value(fields)? {
        serde_json::Value::Object(map) => {
            record.extend(map);
            Ok(())
        }
        other => Err(Error::config(format!(
            "resource fields must serialize to an object, got {other}"
        ))),
    }
}

/// A provisionable unit of infrastructure.
///
/// Implementors supply the concrete work in [`provision`](Self::provision)
/// and [`teardown`](Self::teardown); callers use [`create`](Self::create)
/// and [`destroy`](Self::destroy), which wrap them in the availability
/// guard.
pub trait Resource: Send + Sync {
    /// Shared fields.
    fn base(&self) -> &ResourceBase;

    /// Mutable shared fields.
    fn base_mut(&mut self) -> &mut ResourceBase;

    /// Implementation name, the registry type key.
    fn kind(&self) -> &'static str;

    /// Provider-assigned identifier, once created.
    fn resource_id(&self) -> Option<String> {
        None
    }

    /// Local names of the resources this one needs to exist first.
    ///
    /// # Errors
    ///
    /// Returns an error if dependencies cannot be determined.
    fn get_dependencies(&self) -> Result<Vec<String>>;

    /// Do the provider work of creating the resource.
    ///
    /// Returns `Ok(true)` once the resource is confirmed to exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request.
    fn provision(&mut self) -> Result<bool>;

    /// Do the provider work of destroying the resource.
    ///
    /// Returns `Ok(true)` once the resource is confirmed gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request.
    fn teardown(&mut self) -> Result<bool>;

    /// Reconcile local state with the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be queried.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    /// Type-specific fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields cannot be serialized.
    fn serialize_fields(&self) -> Result<ResourceRecord> {
        Ok(ResourceRecord::new())
    }

    /// Load type-specific fields; absent keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a known key holds a malformed value.
    fn deserialize_fields(&mut self, _record: &ResourceRecord) -> Result<()> {
        Ok(())
    }

    /// Local name.
    fn local_name(&self) -> &str {
        self.base().local_name()
    }

    /// Full record: shared fields plus type-specific ones.
    ///
    /// # Errors
    ///
    /// Returns an error if any field fails to serialize.
    fn serialize(&self) -> Result<ResourceRecord> {
        let mut record = self.serialize_fields()?;
        self.base().write_record(&mut record)?;
        Ok(record)
    }

    /// Load shared and type-specific fields from a record.
    ///
    /// # Errors
    ///
    /// Returns an error if a known key holds a malformed value.
    fn deserialize(&mut self, record: &ResourceRecord) -> Result<()> {
        self.base_mut().read_record(record)?;
        self.deserialize_fields(record)
    }

    /// Create the resource unless it is already available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingStack`] if the resource is not attached to a
    /// live stack, or whatever [`provision`](Self::provision) returns.
    fn create(&mut self) -> Result<bool> {
        let kind = self.kind();
        info!(resource = %self.local_name(), kind, "Creating resource");

        if self.base().available() {
            debug!(resource = %self.local_name(), "Resource is already available");
            return Ok(true);
        }

        if self.base().stack_context().is_none() {
            return Err(Error::MissingStack {
                local_name: self.local_name().to_string(),
            });
        }

        let previous = self.base().state;
        self.base_mut().state = ResourceState::PendingCreate;
        let provisioned = self.provision();

        let base = self.base_mut();
        match provisioned {
            Ok(true) => {
                base.available = true;
                base.state = ResourceState::Available;
                info!(resource = %base.local_name, state = %base.state, "Resource created");
                Ok(true)
            }
            Ok(false) => {
                base.state = previous;
                warn!(resource = %base.local_name, "Resource not confirmed available");
                Ok(false)
            }
            Err(err) => {
                base.state = previous;
                Err(err)
            }
        }
    }

    /// Destroy the resource unless it is already unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingStack`] if the resource is not attached to a
    /// live stack, or whatever [`teardown`](Self::teardown) returns.
    fn destroy(&mut self) -> Result<bool> {
        let kind = self.kind();
        info!(resource = %self.local_name(), kind, "Destroying resource");

        if !self.base().available() {
            debug!(resource = %self.local_name(), "Resource is already unavailable");
            return Ok(true);
        }

        if self.base().stack_context().is_none() {
            return Err(Error::MissingStack {
                local_name: self.local_name().to_string(),
            });
        }

        self.base_mut().state = ResourceState::PendingDestroy;
        let torn_down = self.teardown();

        let base = self.base_mut();
        match torn_down {
            Ok(true) => {
                base.available = false;
                base.state = ResourceState::Destroyed;
                info!(resource = %base.local_name, state = %base.state, "Resource destroyed");
                Ok(true)
            }
            Ok(false) => {
                base.state = ResourceState::Available;
                warn!(resource = %base.local_name, "Resource not confirmed destroyed");
                Ok(false)
            }
            Err(err) => {
                base.state = ResourceState::Available;
                Err(err)
            }
        }
    }
}
