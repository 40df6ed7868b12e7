//! Command execution.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use shepherd_core::actions::{create_stack, destroy_stack, find_stacks, show_stack};
use shepherd_core::{Config, FileManifest, PluginRegistry, Settings, SimulatedNetwork};
use tracing::{debug, info_span, instrument};

use crate::cli::{Commands, DEFAULT_CONFIG_FILE, tags_from};
use crate::tracing::correlation_id;

/// Settings from an explicit path, the default file if present, or defaults.
///
/// # Errors
///
/// Returns an error if an explicit file is missing or any file is invalid.
pub fn load_config(path: Option<&Path>, name: &str) -> miette::Result<Config> {
    let registry = Arc::new(PluginRegistry::builtin(Arc::new(SimulatedNetwork::new())));

    let config = match path {
        Some(path) => Config::from_file(path, name, registry)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Config::from_file(DEFAULT_CONFIG_FILE, name, registry)?
        }
        None => {
            debug!("No settings file, using defaults");
            Config::new(name, Settings::default(), registry)?
        }
    };
    Ok(config)
}

/// Run a command, writing its result to `out`.
///
/// # Errors
///
/// Returns the command's error, or an error writing the output.
#[instrument(skip_all)]
pub fn execute(command: Commands, config: &Config, out: &mut impl Write) -> miette::Result<()> {
    match command {
        Commands::Create { name, manifest } => {
            let _span = info_span!("command", command = "create", correlation_id = %correlation_id()).entered();
            let loader = manifest.map_or_else(FileManifest::from_settings, FileManifest::new);
            let stack = create_stack(&name, config, &loader)?;
            write_line(out, stack.global_name())
        }
        Commands::Destroy { name } => {
            let _span = info_span!("command", command = "destroy", correlation_id = %correlation_id()).entered();
            let global_name = destroy_stack(&name, config)?;
            write_line(out, &global_name)
        }
        Commands::Show { name } => {
            let record = show_stack(&name, config)?;
            let rendered = serde_json::to_string_pretty(&record)
                .map_err(|e| miette::miette!("Failed to render stack: {e}"))?;
            write_line(out, &rendered)
        }
        Commands::List { tags } => {
            for name in find_stacks(&tags_from(tags), config)? {
                write_line(out, &name)?;
            }
            Ok(())
        }
    }
}

fn write_line(out: &mut impl Write, line: &str) -> miette::Result<()> {
    writeln!(out, "{line}").map_err(|e| miette::miette!("Failed to write output: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let path = dir.path().join("shepherd.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "retries: 0\ndelay: 0\nstorage:\n  name: FileStorage\n  settings:\n    path: {}",
            dir.path().join("stacks").display()
        )
        .unwrap();
        load_config(Some(&path), "test").unwrap()
    }

    fn manifest(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("stack.yml");
        std::fs::write(
            &path,
            "- local_name: web\n  type: SecurityGroup\n  provider: aws\n  group_description: web tier\n",
        )
        .unwrap();
        path
    }

    fn run(command: Commands, config: &Config) -> String {
        let mut out = Vec::new();
        execute(command, config, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_create_show_list_destroy() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let created = run(
            Commands::Create {
                name: "web".to_string(),
                manifest: Some(manifest(&dir)),
            },
            &config,
        );
        let global_name = created.trim().to_string();
        assert!(global_name.starts_with("web_"));

        let shown = run(Commands::Show { name: global_name.clone() }, &config);
        let record: serde_json::Value = serde_json::from_str(&shown).unwrap();
        assert_eq!(record["resources"][0]["available"], true);

        let listed = run(
            Commands::List {
                tags: vec![("stack_name".to_string(), "web".to_string())],
            },
            &config,
        );
        assert_eq!(listed.trim(), global_name);

        let destroyed = run(Commands::Destroy { name: global_name.clone() }, &config);
        assert_eq!(destroyed.trim(), global_name);
    }

    #[test]
    fn test_missing_explicit_config() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.yml")), "test").is_err());
    }

    #[test]
    fn test_create_without_manifest_path() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let mut out = Vec::new();
        let result = execute(
            Commands::Create {
                name: "web".to_string(),
                manifest: None,
            },
            &config,
            &mut out,
        );
        assert!(result.is_err());
        assert!(out.is_empty());
    }
}
