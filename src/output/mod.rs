use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use console::style;
use log::info;
use serde::Serialize;

/// Prints the `ghsync` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        style("⇅ ghsync").magenta().bold(),
        style(env!("CARGO_PKG_VERSION")).dim(),
        style("GitHub synchronization engine").dim()
    );
}

/// Write `value` as JSON to `output`, or stdout when no path is given.
pub fn emit_json<T: Serialize>(value: &T, output: Option<&Path>, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };

    if let Some(path) = output {
        std::fs::write(path, json)?;
        info!("Result written to: {}", path.display());
    } else {
        println!("{json}");
    }
    Ok(())
}

pub fn print_done(message: impl std::fmt::Display) {
    eprintln!("{} {}", style("✓").bright().green(), message);
}

/// Tell the operator when to rerun a paused command.
pub fn print_pause(resume_at: DateTime<Utc>, reason: &str) {
    eprintln!(
        "{} paused until {} ({})",
        style("⏸").bright().yellow(),
        style(resume_at.to_rfc3339()).cyan(),
        style(reason).dim()
    );
}
