//! `shellup status`

use shellup::engine::{StatusEntry, EXIT_SUCCESS};
use shellup::UpdateEngine;

use crate::error::CliError;
use crate::output::Output;

/// Run the status command.
pub fn run(engine: &UpdateEngine, out: &dyn Output) -> Result<i32, CliError> {
    let entries = engine.status()?;

    out.section("Components");
    if entries.is_empty() {
        out.info("No components recorded");
        return Ok(EXIT_SUCCESS);
    }

    for entry in &entries {
        print_entry(out, entry);
    }
    Ok(EXIT_SUCCESS)
}

fn print_entry(out: &dyn Output, entry: &StatusEntry) {
    if !entry.managed {
        out.info(&format!(
            "{}: installed outside shellup at {} (run 'shellup install {}' to manage it)",
            entry.name,
            entry.install_path.display(),
            entry.name
        ));
        return;
    }

    let installed = entry
        .installed_version
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "not installed".to_string());
    let latest = match &entry.latest {
        Ok(version) => version.to_string(),
        Err(e) => format!("unknown ({})", e.kind()),
    };
    let disk = entry
        .disk
        .map(|d| format!(", {}", d))
        .unwrap_or_default();

    let line = format!(
        "{}: {} (latest {}{}) at {}",
        entry.name,
        installed,
        latest,
        disk,
        entry.install_path.display()
    );

    if entry.update_available() {
        let newer = match entry.newer_releases {
            0 | 1 => String::new(),
            n => format!(", {} newer releases", n),
        };
        out.warn(&format!("{} - update available{}", line, newer));
    } else {
        out.info(&line);
    }
}
