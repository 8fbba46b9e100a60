//! Status command: last successful attempt times, for overdue-run decisions.

use console::style;

use crate::config::Settings;
use crate::models::TargetKind;
use crate::repository::{SqliteStore, Store};

pub fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let store = SqliteStore::new(&settings.database_path())?;

    let overall = store.last_successful_attempt(None)?;
    match overall {
        Some(when) => println!(
            "{} Last successful scrape: {}",
            style("→").cyan(),
            when.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("{} No successful scrapes recorded yet", style("→").cyan()),
    }

    for kind in [
        TargetKind::Currency,
        TargetKind::Investment,
        TargetKind::Benchmark,
    ] {
        match store.last_successful_attempt(Some(kind))? {
            Some(when) => println!(
                "  {} {:<12} {}",
                style("✓").green(),
                kind,
                when.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => println!("  {} {:<12} never", style("○").dim(), kind),
        }
    }

    Ok(())
}
