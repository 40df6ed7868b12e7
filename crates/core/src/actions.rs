//! High-level operations over stacks, as exposed by the CLI.

use tracing::{error, info, instrument};

use crate::Tags;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::manifest::ManifestLoader;
use crate::stack::{Stack, StackRecord};

/// Build a stack from a manifest, create its resources and save it.
///
/// The stack is saved whether or not provisioning succeeds, so a later
/// destroy can clean up whatever was created.
///
/// # Errors
///
/// Returns a configuration error before anything is created, or
/// [`Error::ProvisionFailed`] after saving the partially created stack.
#[instrument(skip(config, manifest), fields(config = %config.name()))]
pub fn create_stack(name: &str, config: &Config, manifest: &dyn ManifestLoader) -> Result<Stack> {
    let stack = Stack::make(name, config, manifest)?;
    let provisioned = stack.provision_resources(None);

    if let Err(err) = stack.save() {
        error!(stack = %stack.global_name(), error = %err, "Failed to save stack");
        provisioned?;
        return Err(err);
    }

    provisioned?;
    info!(stack = %stack.global_name(), "Stack created");
    Ok(stack)
}

/// Restore a stack, destroy its resources and save the result.
///
/// The stack stays in storage with every resource marked unavailable.
/// Returns the stack's global name.
///
/// # Errors
///
/// Returns [`Error::StackNotFound`] if nothing is stored under the name, or
/// [`Error::DeprovisionFailed`] after saving the partially destroyed stack.
#[instrument(skip(config), fields(config = %config.name()))]
pub fn destroy_stack(global_name: &str, config: &Config) -> Result<String> {
    let stack = Stack::restore(global_name, config)?;
    let deprovisioned = stack.deprovision_resources(None);

    if let Err(err) = stack.save() {
        error!(stack = %stack.global_name(), error = %err, "Failed to save stack");
        deprovisioned?;
        return Err(err);
    }

    deprovisioned?;
    info!(stack = %stack.global_name(), "Stack destroyed");
    Ok(stack.global_name().to_string())
}

/// The stored record of a stack.
///
/// # Errors
///
/// Returns [`Error::StackNotFound`] if nothing is stored under the name.
pub fn show_stack(global_name: &str, config: &Config) -> Result<StackRecord> {
    config
        .storage()?
        .load(global_name)?
        .ok_or_else(|| Error::StackNotFound {
            name: global_name.to_string(),
        })
}

/// Global names of stored stacks carrying every given tag.
///
/// # Errors
///
/// Returns an error if the storage backend cannot be read.
pub fn find_stacks(tags: &Tags, config: &Config) -> Result<Vec<String>> {
    config.storage()?.search(tags)
}
