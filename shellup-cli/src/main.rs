//! Shellup CLI - install and update Noctalia shell components
//!
//! Thin front end over the `shellup` library: parses arguments, sets up
//! logging, runs one command and maps the result to an exit code.

mod commands;
mod error;
mod output;

use std::path::PathBuf;
use std::process;

use clap::{ArgGroup, Parser, Subcommand};
use semver::Version;
use shellup::config::EngineConfig;
use shellup::logging::init_logging;
use shellup::UpdateEngine;
use tracing::debug;

use commands::install::InstallArgs;
use commands::update::UpdateTarget;
use error::CliError;
use output::{ConsoleOutput, Output};

#[derive(Debug, Parser)]
#[command(name = "shellup", version, about = "Install and update Noctalia shell components")]
struct Cli {
    /// Configuration file (default: <config_dir>/shellup/config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install a component, at the latest or a pinned version
    Install {
        /// Component name (e.g. shell)
        name: String,

        /// Exact version to install; may be lower than the installed one
        #[arg(long)]
        version: Option<Version>,
    },

    /// Update one installed component, or all of them
    #[command(group(ArgGroup::new("target").required(true).args(["name", "all"])))]
    Update {
        /// Component name
        name: Option<String>,

        /// Update every installed component
        #[arg(long)]
        all: bool,
    },

    /// Show installed versions, available updates and on-disk state
    Status,
}

fn main() {
    let cli = Cli::parse();
    let out = ConsoleOutput::new();

    let code = match run(cli, &out) {
        Ok(code) => code,
        Err(e) => {
            commands::print_error(&out, &e);
            e.exit_code()
        }
    };
    process::exit(code);
}

fn run(cli: Cli, out: &dyn Output) -> Result<i32, CliError> {
    let config = EngineConfig::load(cli.config.as_deref())?;

    let _guard = init_logging(cli.verbose, &config.log_dir)
        .map_err(|e| CliError::Logging(e.to_string()))?;
    debug!(command = ?cli.command, "shellup starting");

    let engine = UpdateEngine::from_config(config)?;

    match cli.command {
        Commands::Install { name, version } => {
            commands::install::run(&engine, out, InstallArgs { name, version })
        }
        Commands::Update { all: true, .. } => {
            commands::update::run(&engine, out, UpdateTarget::All)
        }
        Commands::Update { name: Some(name), .. } => {
            commands::update::run(&engine, out, UpdateTarget::One(name))
        }
        Commands::Update { name: None, .. } => Err(CliError::Config(
            "update needs a component name or --all".to_string(),
        )),
        Commands::Status => commands::status::run(&engine, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install_with_version() {
        let cli = Cli::try_parse_from(["shellup", "install", "shell", "--version", "2.1.0"]).unwrap();
        match cli.command {
            Commands::Install { name, version } => {
                assert_eq!(name, "shell");
                assert_eq!(version, Some(Version::new(2, 1, 0)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_invalid_version_rejected() {
        assert!(Cli::try_parse_from(["shellup", "install", "shell", "--version", "latest"]).is_err());
    }

    #[test]
    fn test_update_needs_target() {
        assert!(Cli::try_parse_from(["shellup", "update"]).is_err());
        assert!(Cli::try_parse_from(["shellup", "update", "shell", "--all"]).is_err());
        assert!(Cli::try_parse_from(["shellup", "update", "--all"]).is_ok());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["shellup", "status", "-v", "--config", "/tmp/c.ini"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.ini")));
    }
}
