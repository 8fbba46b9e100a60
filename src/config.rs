//! Configuration management.
//!
//! Settings come from an optional TOML file with built-in defaults for
//! everything; `.env` is loaded at startup and `QUOTEFETCH_DELAY_PROFILE`
//! can force a delay profile regardless of how a run was started.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models::StartedBy;
use crate::scrapers::rates::DEFAULT_RATES_ENDPOINT;
use crate::scrapers::{BrowserEngineConfig, DelayProfile, SiteTables};

/// Environment variable that forces a delay profile for every run.
pub const DELAY_PROFILE_ENV: &str = "QUOTEFETCH_DELAY_PROFILE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where the database lives.
    pub data_dir: PathBuf,

    /// Currency that exchange rates are quoted against.
    pub base_currency: String,

    /// Delay profile name used when neither the CLI nor the environment
    /// picks one ("interactive" or "scheduled").
    pub delay_profile: Option<String>,

    /// JSON endpoint for the one-shot FX rate fetch.
    pub rates_endpoint: String,

    pub browser: BrowserEngineConfig,

    pub sites: SiteTables,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            base_currency: "GBP".to_string(),
            delay_profile: None,
            rates_endpoint: DEFAULT_RATES_ENDPOINT.to_string(),
            browser: BrowserEngineConfig::default(),
            sites: SiteTables::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".local/share/quotefetch"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Settings {
    /// Load settings from an explicit path, or from `quotefetch.toml` in the
    /// working directory if present, or defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let candidate = match path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default = PathBuf::from("quotefetch.toml");
                default.exists().then_some(default)
            }
        };

        match candidate {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("quotefetch.db")
    }

    /// The delay profile for a run. Priority: CLI flag, environment
    /// override, settings file, then a default keyed off how the run was
    /// started (scheduled runs wait longer). Unknown names fall back to
    /// interactive inside `DelayProfile::named`.
    pub fn active_delay_profile(
        &self,
        cli_choice: Option<&str>,
        started_by: StartedBy,
    ) -> DelayProfile {
        if let Some(name) = cli_choice {
            return DelayProfile::named(name);
        }
        if let Ok(name) = std::env::var(DELAY_PROFILE_ENV) {
            return DelayProfile::named(&name);
        }
        if let Some(name) = &self.delay_profile {
            return DelayProfile::named(name);
        }
        match started_by {
            StartedBy::Scheduled => DelayProfile::scheduled(),
            _ => DelayProfile::interactive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let settings = Settings::default();
        assert_eq!(settings.base_currency, "GBP");
        assert!(!settings.sites.patterns.is_empty());
        assert!(settings.browser.headless);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            base_currency = "USD"

            [browser]
            headless = false
            "#,
        )
        .unwrap();
        assert_eq!(settings.base_currency, "USD");
        assert!(!settings.browser.headless);
        assert_eq!(settings.rates_endpoint, DEFAULT_RATES_ENDPOINT);
        assert!(!settings.sites.patterns.is_empty());
    }

    #[test]
    fn cli_choice_beats_everything() {
        let mut settings = Settings::default();
        settings.delay_profile = Some("interactive".to_string());
        let profile = settings.active_delay_profile(Some("scheduled"), StartedBy::Interactive);
        assert_eq!(profile, DelayProfile::scheduled());
    }

    #[test]
    fn scheduled_runs_default_to_the_scheduled_profile() {
        let settings = Settings::default();
        // Only meaningful when the env override is absent; the CLI test
        // runner does not set it.
        if std::env::var(DELAY_PROFILE_ENV).is_err() {
            assert_eq!(
                settings.active_delay_profile(None, StartedBy::Scheduled),
                DelayProfile::scheduled()
            );
            assert_eq!(
                settings.active_delay_profile(None, StartedBy::Interactive),
                DelayProfile::interactive()
            );
        }
    }
}
