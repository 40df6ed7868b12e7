//! Stack orchestration.
//!
//! A [`Stack`] owns an ordered collection of resources, derives the
//! dependency graph between them, and drives creation and teardown through
//! the task executor. Teardown runs over the inverse graph, so a resource is
//! destroyed only after everything that depends on it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shepherd_task_graph::{Prerequisites, RunReport, Task, TaskGraph};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, Settings};
use crate::error::{Error, Result};
use crate::manifest::ManifestLoader;
use crate::resource::{Resource, ResourceRecord, SharedResource, StackRef, normalize_record};
use crate::{Tags, tags_match, template};

/// Global name template used when settings do not override it.
pub const DEFAULT_NAME_FMT: &str = "{stack_name}_{stack_creation}";

/// Format of the `stack_creation` tag.
pub const CREATION_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Longest global name handed to providers.
pub const MAX_GLOBAL_NAME_LEN: usize = 63;

/// Persisted form of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackRecord {
    /// Name the stack was created with
    pub local_name: String,

    /// Unique name, the storage key
    pub global_name: String,

    /// Name of the config the stack was created under
    #[serde(default)]
    pub config_name: String,

    /// Settings in effect at creation
    #[serde(default)]
    pub settings: Settings,

    /// Stack tags
    #[serde(default)]
    pub tags: Tags,

    /// Resources in stack order
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
}

#[derive(Clone)]
struct ResourceSlot {
    local_name: String,
    resource: SharedResource,
}

/// Identity and resources of a stack, shared with its resources.
///
/// Resources reach this through their [`StackRef`] to look up siblings and
/// read settings.
pub struct StackContext {
    local_name: String,
    global_name: String,
    config_name: String,
    settings: Settings,
    tags: Tags,
    slots: RwLock<Vec<ResourceSlot>>,
}

impl StackContext {
    /// Name the stack was created with.
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Unique stack name.
    #[must_use]
    pub fn global_name(&self) -> &str {
        &self.global_name
    }

    /// Settings in effect for this stack.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stack tags.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Provider-facing name for a resource of this stack.
    ///
    /// `{local_name}_{stack_global_name}`, cut to 63 characters.
    #[must_use]
    pub fn get_global_resource_name(&self, local_name: &str) -> String {
        format!("{local_name}_{}", self.global_name)
            .chars()
            .take(MAX_GLOBAL_NAME_LEN)
            .collect()
    }

    /// Resource with this local name.
    ///
    /// Does not lock any resource, so it is safe to call while holding one.
    #[must_use]
    pub fn get_resource_by_name(&self, local_name: &str) -> Option<SharedResource> {
        self.slots
            .read()
            .iter()
            .find(|slot| slot.local_name == local_name)
            .map(|slot| Arc::clone(&slot.resource))
    }

    fn snapshot(&self) -> Vec<ResourceSlot> {
        self.slots.read().clone()
    }
}

impl fmt::Debug for StackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackContext")
            .field("local_name", &self.local_name)
            .field("global_name", &self.global_name)
            .field("resources", &self.slots.read().len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Create,
    Destroy,
}

/// A provisioning unit: named resources with dependencies between them.
pub struct Stack {
    context: Arc<StackContext>,
    config: Config,
}

impl Stack {
    /// Fresh, empty stack created now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] if `stack_name_fmt` references a tag the
    /// stack does not have.
    pub fn new(name: &str, config: &Config) -> Result<Self> {
        Self::with_creation_time(name, config, Utc::now())
    }

    /// Fresh, empty stack with an explicit creation time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] if `stack_name_fmt` references a tag the
    /// stack does not have.
    pub fn with_creation_time(name: &str, config: &Config, created: DateTime<Utc>) -> Result<Self> {
        let settings = config.settings().clone();

        let mut tags = Tags::from([
            ("stack_name".to_string(), name.to_string()),
            (
                "stack_creation".to_string(),
                created.format(CREATION_FORMAT).to_string(),
            ),
        ]);
        if let Some(extra) = &settings.tags {
            tags.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let name_fmt = settings.stack_name_fmt.as_deref().unwrap_or(DEFAULT_NAME_FMT);
        let global_name = template::render(name_fmt, &tags)?;
        debug!(stack = %global_name, "Created stack");

        Ok(Self::from_parts(
            name.to_string(),
            global_name,
            config.name().to_string(),
            tags,
            config.clone(),
        ))
    }

    fn from_parts(
        local_name: String,
        global_name: String,
        config_name: String,
        tags: Tags,
        config: Config,
    ) -> Self {
        let context = Arc::new(StackContext {
            local_name,
            global_name,
            config_name,
            settings: config.settings().clone(),
            tags,
            slots: RwLock::new(Vec::new()),
        });
        Self { context, config }
    }

    /// Build a new stack from a manifest.
    ///
    /// Every record is resolved to a registered implementation before the
    /// stack is returned, so configuration errors surface before any
    /// resource is touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be loaded or references an
    /// unknown type, provider or duplicate name.
    #[instrument(name = "stack_make", skip(config, manifest))]
    pub fn make(name: &str, config: &Config, manifest: &dyn ManifestLoader) -> Result<Self> {
        let records = manifest.load(config)?;
        let stack = Self::new(name, config)?;
        stack.deserialize_resources(&records)?;
        info!(
            stack = %stack.global_name(),
            resources = records.len(),
            "Stack built from manifest"
        );
        Ok(stack)
    }

    /// Load a stack from the storage backend the config selects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginNotFound`] if the backend is not registered,
    /// [`Error::StackNotFound`] if nothing is stored under `name`.
    #[instrument(name = "stack_restore", skip(config))]
    pub fn restore(name: &str, config: &Config) -> Result<Self> {
        debug!(storage = %config.settings().storage.name, "Restoring stack");
        let storage = config.storage()?;
        let record = storage.load(name)?.ok_or_else(|| Error::StackNotFound {
            name: name.to_string(),
        })?;
        Self::deserialize(record, config)
    }

    /// Persist the stack to the storage backend the config selects.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is missing or the write fails.
    #[instrument(name = "stack_save", skip(self), fields(stack = %self.global_name()))]
    pub fn save(&self) -> Result<()> {
        let storage = self.config.storage()?;
        storage.dump(&self.serialize()?)?;
        info!(storage = %self.config.settings().storage.name, "Stack saved");
        Ok(())
    }

    /// Serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource fails to serialize.
    pub fn serialize(&self) -> Result<StackRecord> {
        let resources = self
            .context
            .snapshot()
            .iter()
            .map(|slot| slot.resource.read().serialize())
            .collect::<Result<Vec<_>>>()?;

        Ok(StackRecord {
            local_name: self.context.local_name.clone(),
            global_name: self.context.global_name.clone(),
            config_name: self.context.config_name.clone(),
            settings: self.context.settings.clone(),
            tags: self.context.tags.clone(),
            resources,
        })
    }

    /// Rebuild a stack from its serialized form.
    ///
    /// The persisted settings come back into effect, except the storage
    /// selector, which stays the caller's.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid or a resource record
    /// cannot be resolved.
    pub fn deserialize(record: StackRecord, config: &Config) -> Result<Self> {
        let settings = Settings {
            storage: config.settings().storage.clone(),
            ..record.settings
        };
        let config = config.with_settings(settings)?;

        let stack = Self::from_parts(
            record.local_name,
            record.global_name,
            record.config_name,
            record.tags,
            config,
        );
        stack.deserialize_resources(&record.resources)?;
        Ok(stack)
    }

    /// Construct, load and attach a resource for every record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a record missing `type` or `provider`,
    /// [`Error::PluginNotFound`] or [`Error::ProviderMismatch`] when no
    /// implementation matches, or [`Error::DuplicateResource`].
    pub fn deserialize_resources(&self, records: &[ResourceRecord]) -> Result<()> {
        for record in records {
            let normalized = normalize_record(record);
            let field = |key: &str| {
                normalized
                    .get(key)
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| Error::config(format!("resource record is missing '{key}'")))
            };
            let resource_type = field("type")?;
            let provider = field("provider")?;

            let mut resource = self.config.registry().resource(resource_type, provider)?;
            resource.deserialize(record)?;
            self.add_resource(resource)?;
        }
        Ok(())
    }

    /// Attach a resource.
    ///
    /// Stack tags are merged into the resource's tags, overriding on
    /// conflict. A resource without a global name gets one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty local name and
    /// [`Error::DuplicateResource`] for a name already in the stack.
    pub fn add_resource(&self, mut resource: Box<dyn Resource>) -> Result<SharedResource> {
        let local_name = resource.local_name().to_string();
        if local_name.is_empty() {
            return Err(Error::config("resource record is missing 'local_name'"));
        }

        let mut slots = self.context.slots.write();
        if slots.iter().any(|slot| slot.local_name == local_name) {
            return Err(Error::DuplicateResource { local_name });
        }

        let base = resource.base_mut();
        base.tags_mut()
            .extend(self.context.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        if base.global_name().is_empty() {
            base.set_global_name(self.context.get_global_resource_name(&local_name));
        }
        base.set_stack(StackRef::new(&self.context));

        debug!(stack = %self.context.global_name, resource = %local_name, "Attached resource");
        let shared: SharedResource = Arc::new(RwLock::new(resource));
        slots.push(ResourceSlot {
            local_name,
            resource: Arc::clone(&shared),
        });
        Ok(shared)
    }

    /// All resources in stack order.
    #[must_use]
    pub fn resources(&self) -> Vec<SharedResource> {
        self.context
            .snapshot()
            .into_iter()
            .map(|slot| slot.resource)
            .collect()
    }

    /// Reconcile every resource with its provider.
    ///
    /// A resource whose sync fails is logged and marked unavailable.
    pub fn sync_resources(&self) {
        for slot in self.context.snapshot() {
            let mut resource = slot.resource.write();
            if let Err(err) = resource.sync() {
                warn!(resource = %slot.local_name, error = %err, "Sync failed, marking unavailable");
                resource.base_mut().set_available(false);
            }
        }
    }

    /// Create the given resources, or every resource, in dependency order.
    ///
    /// A prerequisite outside the subset is skipped when already available;
    /// otherwise the dependent resource fails without being attempted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownResource`] for a name not in the stack, and
    /// [`Error::ProvisionFailed`] if any resource did not become available.
    #[instrument(name = "provision", skip_all, fields(stack = %self.global_name()))]
    pub fn provision_resources(&self, subset: Option<&[&str]>) -> Result<RunReport> {
        let selected = self.select(subset)?;
        let forward = self.dependency_map()?;

        let prerequisites: HashMap<String, Vec<String>> = selected
            .iter()
            .map(|slot| {
                let deps = forward.get(&slot.local_name).cloned().unwrap_or_default();
                (slot.local_name.clone(), self.external_prerequisites(&selected, deps, true))
            })
            .collect();

        let report = self.run(&selected, &prerequisites, Lifecycle::Create);
        if report.passed() {
            Ok(report)
        } else {
            Err(Error::ProvisionFailed {
                stack: self.global_name().to_string(),
                completed: report.completed(),
                failed: report.failed(),
            })
        }
    }

    /// Destroy the given resources, or every resource, dependents first.
    ///
    /// A dependent outside the subset is skipped when already unavailable;
    /// otherwise the resource it depends on fails without being attempted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownResource`] for a name not in the stack, and
    /// [`Error::DeprovisionFailed`] if any resource was not torn down.
    #[instrument(name = "deprovision", skip_all, fields(stack = %self.global_name()))]
    pub fn deprovision_resources(&self, subset: Option<&[&str]>) -> Result<RunReport> {
        let selected = self.select(subset)?;
        let inverse = self.inverse_dependency_graph()?;

        let prerequisites: HashMap<String, Vec<String>> = selected
            .iter()
            .map(|slot| {
                let dependents = inverse
                    .dependencies(&slot.local_name)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                (slot.local_name.clone(), self.external_prerequisites(&selected, dependents, false))
            })
            .collect();

        let report = self.run(&selected, &prerequisites, Lifecycle::Destroy);
        if report.passed() {
            Ok(report)
        } else {
            Err(Error::DeprovisionFailed {
                stack: self.global_name().to_string(),
                completed: report.completed(),
                failed: report.failed(),
            })
        }
    }

    /// Resource with this local name.
    #[must_use]
    pub fn get_resource_by_name(&self, local_name: &str) -> Option<SharedResource> {
        self.context.get_resource_by_name(local_name)
    }

    /// Resources whose implementation or recorded type matches.
    #[must_use]
    pub fn get_resource_by_type(&self, resource_type: &str) -> Vec<SharedResource> {
        debug!(resource_type, "Looking up resources by type");
        self.resources()
            .into_iter()
            .filter(|shared| {
                let resource = shared.read();
                resource.kind() == resource_type || resource.base().kind() == resource_type
            })
            .collect()
    }

    /// Resources whose tags contain every given key/value pair.
    #[must_use]
    pub fn get_resource_by_tags(&self, tags: &Tags) -> Vec<SharedResource> {
        self.resources()
            .into_iter()
            .filter(|shared| tags_match(shared.read().base().tags(), tags))
            .collect()
    }

    /// Provider-facing name for a resource of this stack.
    #[must_use]
    pub fn get_global_resource_name(&self, local_name: &str) -> String {
        self.context.get_global_resource_name(local_name)
    }

    /// Name the stack was created with.
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.context.local_name
    }

    /// Unique stack name.
    #[must_use]
    pub fn global_name(&self) -> &str {
        &self.context.global_name
    }

    /// Name of the config the stack was created under.
    #[must_use]
    pub fn config_name(&self) -> &str {
        &self.context.config_name
    }

    /// Settings in effect.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.context.settings
    }

    /// Stack tags.
    #[must_use]
    pub fn tags(&self) -> &Tags {
        &self.context.tags
    }

    /// Shared identity handed to resources.
    #[must_use]
    pub fn context(&self) -> &Arc<StackContext> {
        &self.context
    }

    fn select(&self, subset: Option<&[&str]>) -> Result<Vec<ResourceSlot>> {
        let slots = self.context.snapshot();
        let Some(names) = subset else {
            return Ok(slots);
        };

        if let Some(unknown) = names
            .iter()
            .find(|name| !slots.iter().any(|slot| slot.local_name == **name))
        {
            return Err(Error::UnknownResource {
                stack: self.global_name().to_string(),
                local_name: (*unknown).to_string(),
            });
        }

        Ok(slots
            .into_iter()
            .filter(|slot| names.contains(&slot.local_name.as_str()))
            .collect())
    }

    fn dependency_map(&self) -> Result<HashMap<String, Vec<String>>> {
        self.context
            .snapshot()
            .into_iter()
            .map(|slot| {
                let deps = slot.resource.read().get_dependencies()?;
                debug!(resource = %slot.local_name, dependencies = ?deps, "Resolved dependencies");
                Ok((slot.local_name, deps))
            })
            .collect()
    }

    /// Reverse of the creation graph over every resource in the stack.
    fn inverse_dependency_graph(&self) -> Result<TaskGraph<Prerequisites>> {
        let mut graph = TaskGraph::new();
        for (name, deps) in self.dependency_map()? {
            graph
                .add_task(&name, Prerequisites(deps))
                .map_err(|e| Error::config(e.to_string()))?;
        }
        if let Err(err) = graph.add_dependency_edges() {
            warn!(error = %err, "Ignoring dependencies on resources outside the stack");
        }
        Ok(graph.inverted())
    }

    /// Drop prerequisites outside the selection that are already in the
    /// state this run wants; keep the rest so the executor blocks on them.
    fn external_prerequisites(
        &self,
        selected: &[ResourceSlot],
        names: Vec<String>,
        want_available: bool,
    ) -> Vec<String> {
        let in_selection: HashSet<&str> = selected.iter().map(|s| s.local_name.as_str()).collect();
        names
            .into_iter()
            .filter(|name| {
                if in_selection.contains(name.as_str()) {
                    return true;
                }
                let settled = self
                    .get_resource_by_name(name)
                    .is_some_and(|r| r.read().base().available() == want_available);
                if !settled {
                    warn!(prerequisite = %name, "Prerequisite outside this run is not ready");
                }
                !settled
            })
            .collect()
    }

    fn run(
        &self,
        selected: &[ResourceSlot],
        prerequisites: &HashMap<String, Vec<String>>,
        lifecycle: Lifecycle,
    ) -> RunReport {
        let settings = &self.context.settings;

        let tasks: Vec<Task<'static>> = selected
            .iter()
            .map(|slot| {
                let deps = prerequisites.get(&slot.local_name).cloned().unwrap_or_default();
                info!(resource = %slot.local_name, ?lifecycle, dependencies = ?deps, "Resource scheduled");

                let resource = Arc::clone(&slot.resource);
                Task::new(slot.local_name.clone(), move || {
                    let mut resource = resource.write();
                    let outcome = match lifecycle {
                        Lifecycle::Create => resource.create(),
                        Lifecycle::Destroy => resource.destroy(),
                    };
                    outcome.map_err(Error::into_task_error)
                })
                .depends_on(deps)
                .retries(settings.retries)
                .delay(settings.delay())
            })
            .collect();

        let report = settings.executor().run(tasks);
        if report.passed() {
            info!(?lifecycle, resources = selected.len(), "All resources succeeded");
        } else {
            error!(?lifecycle, failed = ?report.failed(), "Some resources failed");
        }
        report
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("local_name", &self.context.local_name)
            .field("global_name", &self.context.global_name)
            .field("config", &self.config.name())
            .finish_non_exhaustive()
    }
}
