//! `shellup install <name> [--version V]`

use semver::Version;
use shellup::engine::EXIT_SUCCESS;
use shellup::UpdateEngine;

use super::print_outcome;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the install command.
pub struct InstallArgs {
    pub name: String,
    /// Exact release to install; the latest when absent.
    pub version: Option<Version>,
}

/// Run the install command.
pub fn run(engine: &UpdateEngine, out: &dyn Output, args: InstallArgs) -> Result<i32, CliError> {
    match &args.version {
        Some(version) => out.step(&format!("Installing {} {}", args.name, version)),
        None => out.step(&format!("Installing {} (latest)", args.name)),
    }

    let report = engine.install(&args.name, args.version)?;
    print_outcome(out, &report);
    Ok(EXIT_SUCCESS)
}
