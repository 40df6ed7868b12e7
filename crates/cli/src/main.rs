//! `shepherd` command line entry point.

mod cli;
mod commands;
mod tracing;

use clap::Parser;

use crate::cli::Cli;
use crate::tracing::{LogLevel, TracingConfig, TracingFormat};

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref(), &cli.config_name)?;

    let level = cli
        .level
        .unwrap_or_else(|| LogLevel::from_verbosity(config.settings().verbosity));
    crate::tracing::init_tracing(TracingConfig {
        format: if cli.json {
            TracingFormat::Json
        } else {
            TracingFormat::Compact
        },
        level: level.into(),
        ..TracingConfig::default()
    })?;
    let stdout = std::io::stdout();
    commands::execute(cli.command, &config, &mut stdout.lock())
}
