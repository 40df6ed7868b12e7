//! Error types for stack orchestration.

use std::collections::BTreeSet;
use std::path::PathBuf;

use miette::Diagnostic;
use shepherd_task_graph::TaskError;
use thiserror::Error;

/// Result type alias using the shepherd error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, provisioning or persisting stacks.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Invalid configuration or manifest content.
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(shepherd::config))]
    Config {
        /// Error message
        message: String,
    },

    /// Configuration file not found.
    #[error("Configuration file not found: {}", path.display())]
    #[diagnostic(code(shepherd::config_not_found))]
    ConfigNotFound {
        /// Path to the missing file
        path: PathBuf,
    },

    /// No plugin registered under the requested name.
    #[error("No {category} plugin named '{name}' is registered")]
    #[diagnostic(
        code(shepherd::plugin_not_found),
        help("Register the plugin with PluginRegistry before building the config")
    )]
    PluginNotFound {
        /// Plugin category
        category: String,
        /// Plugin name
        name: String,
    },

    /// A resource plugin exists for the type, but not for the provider.
    #[error("Resource type '{resource_type}' has no implementation for provider '{provider}'")]
    #[diagnostic(code(shepherd::provider_mismatch))]
    ProviderMismatch {
        /// Resource type
        resource_type: String,
        /// Requested provider
        provider: String,
    },

    /// Two resources in one stack share a local name.
    #[error("Stack already contains a resource named '{local_name}'")]
    #[diagnostic(code(shepherd::duplicate_resource))]
    DuplicateResource {
        /// Duplicated local name
        local_name: String,
    },

    /// A resource name was requested that the stack does not contain.
    #[error("Stack {stack} has no resource named '{local_name}'")]
    #[diagnostic(code(shepherd::unknown_resource))]
    UnknownResource {
        /// Stack global name
        stack: String,
        /// Requested local name
        local_name: String,
    },

    /// A name template referenced a key with no value.
    #[error("Template '{template}' references unknown key '{key}'")]
    #[diagnostic(
        code(shepherd::template),
        help("Placeholders must name a stack tag such as {{stack_name}}")
    )]
    Template {
        /// The template being rendered
        template: String,
        /// The missing key
        key: String,
    },

    /// A resource was asked to change state without a parent stack.
    #[error("Resource {local_name} has no parent stack; attach it to a stack before create or destroy")]
    #[diagnostic(code(shepherd::missing_stack))]
    MissingStack {
        /// Resource local name
        local_name: String,
    },

    /// Storage holds no stack under the requested name.
    #[error("Stack not found: {name}")]
    #[diagnostic(code(shepherd::stack_not_found))]
    StackNotFound {
        /// Stack global name
        name: String,
    },

    /// One or more resources failed to provision.
    #[error("Failed to provision stack {stack}: {} resource(s) failed", failed.len())]
    #[diagnostic(
        code(shepherd::provision_failed),
        help("Completed resources are left in place; deprovision them or re-run create")
    )]
    ProvisionFailed {
        /// Stack global name
        stack: String,
        /// Resources that are available
        completed: BTreeSet<String>,
        /// Resources that failed or were skipped
        failed: BTreeSet<String>,
    },

    /// One or more resources failed to deprovision.
    #[error("Failed to deprovision stack {stack}: {} resource(s) failed", failed.len())]
    #[diagnostic(code(shepherd::deprovision_failed))]
    DeprovisionFailed {
        /// Stack global name
        stack: String,
        /// Resources that were torn down
        completed: BTreeSet<String>,
        /// Resources that failed or were skipped
        failed: BTreeSet<String>,
    },

    /// A provider operation failed.
    #[error("Resource operation failed for {resource}: {message}")]
    #[diagnostic(code(shepherd::resource))]
    Resource {
        /// Resource local name
        resource: String,
        /// Error message
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    #[diagnostic(code(shepherd::io))]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(shepherd::serialization))]
    Serialization(#[from] serde_json::Error),

    /// YAML parse error.
    #[error("YAML error: {0}")]
    #[diagnostic(code(shepherd::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a provider operation error.
    pub fn resource(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resource {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a plugin lookup error.
    pub fn plugin_not_found(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self::PluginNotFound {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Whether retrying the failed operation cannot help.
    ///
    /// Configuration and precondition failures are fatal; provider, IO and
    /// serialization failures may be transient.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Resource { .. } | Self::Io(_) | Self::Serialization(_)
        )
    }

    /// Hand the error to the executor, carrying its fatal classification.
    #[must_use]
    pub fn into_task_error(self) -> TaskError {
        let fatal = self.is_fatal();
        TaskError::new(self, fatal)
    }
}
