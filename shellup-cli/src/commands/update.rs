//! `shellup update <name> | --all`

use shellup::engine::{RunReport, EXIT_SUCCESS};
use shellup::UpdateEngine;

use super::print_outcome;
use crate::error::CliError;
use crate::output::Output;

/// What to update.
pub enum UpdateTarget {
    One(String),
    All,
}

/// Run the update command.
pub fn run(engine: &UpdateEngine, out: &dyn Output, target: UpdateTarget) -> Result<i32, CliError> {
    match target {
        UpdateTarget::One(name) => {
            out.step(&format!("Updating {}", name));
            let report = engine.update(&name)?;
            print_outcome(out, &report);
            Ok(EXIT_SUCCESS)
        }
        UpdateTarget::All => {
            out.section("Updating installed components");
            let report = engine.update_all()?;
            print_run(out, &report);
            Ok(report.exit_code())
        }
    }
}

fn print_run(out: &dyn Output, report: &RunReport) {
    if report.components.is_empty() {
        out.info("Nothing installed");
        return;
    }

    for component in &report.components {
        print_outcome(out, component);
    }

    let failed = report.failures().count();
    let summary = format!(
        "{} changed, {} failed, {} total",
        report.changed(),
        failed,
        report.components.len()
    );
    if failed == 0 {
        out.success(&summary);
    } else {
        out.warn(&summary);
    }

    if let Some(fatal) = report.fatal_error() {
        out.error(&format!(
            "[{}] run halted: {}",
            fatal.kind(),
            fatal
        ));
    }
}
