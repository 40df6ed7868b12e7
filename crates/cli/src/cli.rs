use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shepherd_core::Tags;

use crate::tracing::LogLevel;

/// Default settings file, used when present and `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "shepherd.yml";

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "shepherd")]
#[command(about = "Provision and tear down stacks of interdependent cloud resources")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Commands,

    /// Logging level, defaulting to the settings' `verbosity`
    #[arg(short = 'l', long, global = true, help = "Set logging level", value_enum)]
    pub level: Option<LogLevel>,

    /// Emit logs as JSON
    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub json: bool,

    /// Settings file
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "SHEPHERD_CONFIG",
        help = "Path to a YAML or JSON settings file"
    )]
    pub config: Option<PathBuf>,

    /// Name of the configuration, recorded on created stacks
    #[arg(long, global = true, default_value = "default", help = "Configuration name")]
    pub config_name: String,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a stack from a manifest and create its resources
    #[command(about = "Create a stack from a manifest")]
    Create {
        /// Stack name
        #[arg(long, short = 'n', help = "Local name of the new stack")]
        name: String,

        /// Manifest file, defaulting to `manifest_path` from the settings
        #[arg(long, short = 'm', help = "Path to the manifest file")]
        manifest: Option<PathBuf>,
    },

    /// Destroy the resources of a stored stack
    #[command(about = "Destroy a stack's resources")]
    Destroy {
        /// Stack global name
        #[arg(help = "Global name of the stack")]
        name: String,
    },

    /// Print a stored stack
    #[command(about = "Show a stored stack as JSON")]
    Show {
        /// Stack global name
        #[arg(help = "Global name of the stack")]
        name: String,
    },

    /// List stored stacks
    #[command(about = "List stored stacks matching every given tag")]
    List {
        /// Tags to match
        #[arg(long = "tag", short = 't', value_parser = parse_tag, help = "Tag filter as key=value")]
        tags: Vec<(String, String)>,
    },
}

/// Parse a `key=value` tag argument.
fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// Collect tag arguments, later values winning.
pub fn tags_from(pairs: Vec<(String, String)>) -> Tags {
    pairs.into_iter().collect()
}
