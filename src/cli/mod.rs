//! CLI parser and command dispatch.

mod scrape;
mod status;
mod targets;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::models::TargetKind;

#[derive(Parser)]
#[command(name = "quotefetch")]
#[command(about = "Market data acquisition: security prices, benchmark levels and FX rates")]
#[command(version)]
pub struct Cli {
    /// Config file path (default: ./quotefetch.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scrape: rates, then prices, then benchmarks
    Scrape {
        /// Delay profile ("interactive" or "scheduled")
        #[arg(long)]
        profile: Option<String>,

        /// Mark the run as unattended (longer delays, logged as scheduled)
        #[arg(long)]
        scheduled: bool,

        /// Total passes including retries of failed targets (1-5)
        #[arg(short, long, default_value = "1")]
        attempts: u8,

        /// Fetch currency rates only
        #[arg(long, conflicts_with_all = ["prices_only", "benchmarks_only"])]
        rates_only: bool,

        /// Scrape investment prices only
        #[arg(long, conflicts_with = "benchmarks_only")]
        prices_only: bool,

        /// Scrape benchmark levels only
        #[arg(long)]
        benchmarks_only: bool,
    },

    /// Scrape a single target by kind and id
    One {
        /// Target kind: investment, benchmark or currency
        kind: String,
        /// Target id
        id: i64,
    },

    /// Show when each target type last scraped successfully
    Status,

    /// Manage scrape targets
    Targets {
        #[command(subcommand)]
        command: TargetCommands,
    },
}

#[derive(Subcommand)]
enum TargetCommands {
    /// List targets of a kind (all kinds if omitted)
    List {
        kind: Option<String>,
    },

    /// Add a target
    Add {
        /// Target kind: investment, benchmark or currency
        kind: String,
        /// Display name
        name: String,
        /// Manual page URL
        #[arg(long)]
        url: Option<String>,
        /// Manual CSS selector
        #[arg(long)]
        selector: Option<String>,
        /// Public identifier (ISIN or EXCHANGE:TICKER)
        #[arg(long)]
        public_id: Option<String>,
        /// Quote currency
        #[arg(long, default_value = "GBP")]
        currency: String,
    },
}

fn parse_kind(raw: &str) -> anyhow::Result<TargetKind> {
    TargetKind::from_str(raw).ok_or_else(|| {
        anyhow::anyhow!("unknown target kind {raw:?} (expected investment, benchmark or currency)")
    })
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Scrape {
            profile,
            scheduled,
            attempts,
            rates_only,
            prices_only,
            benchmarks_only,
        } => {
            let scope = crate::scrapers::RunScope {
                rates: !prices_only && !benchmarks_only,
                prices: !rates_only && !benchmarks_only,
                benchmarks: !rates_only && !prices_only,
            };
            scrape::cmd_scrape(
                &settings,
                profile.as_deref(),
                scheduled,
                attempts.clamp(1, 5),
                scope,
            )
            .await
        }
        Commands::One { kind, id } => {
            scrape::cmd_scrape_one(&settings, parse_kind(&kind)?, id).await
        }
        Commands::Status => status::cmd_status(&settings),
        Commands::Targets { command } => match command {
            TargetCommands::List { kind } => {
                let kind = kind.as_deref().map(parse_kind).transpose()?;
                targets::cmd_list(&settings, kind)
            }
            TargetCommands::Add {
                kind,
                name,
                url,
                selector,
                public_id,
                currency,
            } => targets::cmd_add(
                &settings,
                parse_kind(&kind)?,
                &name,
                url,
                selector,
                public_id,
                &currency,
            ),
        },
    }
}
