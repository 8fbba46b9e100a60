//! Target management plumbing: list and add.

use console::style;

use crate::config::Settings;
use crate::models::{ScrapeTarget, TargetKind};
use crate::repository::SqliteStore;
use crate::scrapers::Resolver;

pub fn cmd_list(settings: &Settings, kind: Option<TargetKind>) -> anyhow::Result<()> {
    let store = SqliteStore::new(&settings.database_path())?;
    let resolver = Resolver::new(&settings.sites);

    let kinds = match kind {
        Some(kind) => vec![kind],
        None => vec![
            TargetKind::Investment,
            TargetKind::Benchmark,
            TargetKind::Currency,
        ],
    };

    for kind in kinds {
        let targets = store.list_targets(kind)?;
        if targets.is_empty() {
            continue;
        }
        println!("{} {} targets:", style("→").cyan(), kind);
        for target in targets {
            let source = match resolver.resolve(&target) {
                Some(resolved) => resolved.url_source.as_str(),
                None if kind == TargetKind::Currency => "rates",
                None => "not scrapeable",
            };
            let last = target
                .last_value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:>4}  {:<30} {:<14} last: {}",
                target.id,
                target.name,
                source,
                last
            );
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_add(
    settings: &Settings,
    kind: TargetKind,
    name: &str,
    url: Option<String>,
    selector: Option<String>,
    public_id: Option<String>,
    currency: &str,
) -> anyhow::Result<()> {
    let store = SqliteStore::new(&settings.database_path())?;

    let mut target = ScrapeTarget::new(0, kind, name, currency);
    target.url = url;
    target.selector = selector;
    target.public_id = public_id;

    let id = store.add_target(&target)?;
    println!("{} Added {} target {} (id {})", style("✓").green(), kind, name, id);
    Ok(())
}
