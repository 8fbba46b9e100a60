//! Randomized politeness delays between navigations.
//!
//! A run hitting the same host twice in a row waits longer than one hopping
//! between hosts; both waits are drawn uniformly from per-profile ranges so
//! the request cadence never looks mechanical.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

/// A named pair of millisecond ranges controlling politeness toward source
/// sites. Selected once per run and passed explicitly; there is no
/// process-wide active profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayProfile {
    /// Inclusive [min, max] wait when the next target shares a hostname
    /// with the previous one.
    pub same_domain: (u64, u64),
    /// Inclusive [min, max] wait when the hostname changes.
    pub different_domain: (u64, u64),
}

impl DelayProfile {
    /// Short waits for manual / UI-triggered runs.
    pub fn interactive() -> Self {
        Self {
            same_domain: (4_000, 9_000),
            different_domain: (1_500, 4_000),
        }
    }

    /// Longer waits for unattended runs, where nobody is watching a spinner.
    pub fn scheduled() -> Self {
        Self {
            same_domain: (9_000, 20_000),
            different_domain: (3_000, 8_000),
        }
    }

    /// Look a profile up by name. Unrecognized names fall back to
    /// `interactive` rather than failing the run.
    pub fn named(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "scheduled" => Self::scheduled(),
            "interactive" => Self::interactive(),
            other => {
                if !other.is_empty() {
                    tracing::warn!("unknown delay profile {:?}, using interactive", other);
                }
                Self::interactive()
            }
        }
    }
}

/// Extract the hostname from a URL. Returns an empty string (never an error)
/// for anything unparseable.
pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

/// Pick a delay given the previous and current hostnames. The first
/// navigation of a sequence (empty previous host) waits nothing.
pub fn delay_between(profile: &DelayProfile, previous_host: &str, current_host: &str) -> u64 {
    if previous_host.is_empty() {
        return 0;
    }
    let (min, max) = if previous_host == current_host {
        profile.same_domain
    } else {
        profile.different_domain
    };
    rand::rng().random_range(min..=max)
}

/// Tracks the previously visited host across one run and hands out the next
/// pause. `reset` starts a fresh sequence (used after a browser relaunch).
#[derive(Debug, Clone)]
pub struct DelayScheduler {
    profile: DelayProfile,
    previous_host: Option<String>,
}

impl DelayScheduler {
    pub fn new(profile: DelayProfile) -> Self {
        Self {
            profile,
            previous_host: None,
        }
    }

    /// Forget the previous host so the next target is treated as the first
    /// of a fresh sequence.
    pub fn reset(&mut self) {
        self.previous_host = None;
    }

    /// Delay to apply before navigating to `url`, advancing the tracked host.
    pub fn next_delay(&mut self, url: &str) -> Duration {
        let host = host_of(url);
        let ms = delay_between(
            &self.profile,
            self.previous_host.as_deref().unwrap_or(""),
            &host,
        );
        self.previous_host = Some(host);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_is_zero() {
        let profile = DelayProfile::interactive();
        assert_eq!(delay_between(&profile, "", "markets.ft.com"), 0);
        assert_eq!(delay_between(&profile, "", ""), 0);
    }

    #[test]
    fn same_domain_falls_in_same_domain_range() {
        let profile = DelayProfile::interactive();
        let (min, max) = profile.same_domain;
        for _ in 0..200 {
            let d = delay_between(&profile, "markets.ft.com", "markets.ft.com");
            assert!(d >= min && d <= max, "{} outside [{}, {}]", d, min, max);
        }
    }

    #[test]
    fn different_domain_falls_in_different_domain_range() {
        let profile = DelayProfile::scheduled();
        let (min, max) = profile.different_domain;
        for _ in 0..200 {
            let d = delay_between(&profile, "markets.ft.com", "www.morningstar.co.uk");
            assert!(d >= min && d <= max, "{} outside [{}, {}]", d, min, max);
        }
    }

    #[test]
    fn repeated_hits_on_one_host_wait_at_least_as_long() {
        for profile in [DelayProfile::interactive(), DelayProfile::scheduled()] {
            assert!(profile.same_domain.0 >= profile.different_domain.0);
            assert!(profile.same_domain.1 >= profile.different_domain.1);
        }
    }

    #[test]
    fn unknown_profile_name_falls_back_to_interactive() {
        assert_eq!(DelayProfile::named("aggressive"), DelayProfile::interactive());
        assert_eq!(DelayProfile::named("SCHEDULED"), DelayProfile::scheduled());
        assert_eq!(DelayProfile::named(" interactive "), DelayProfile::interactive());
    }

    #[test]
    fn host_of_never_fails() {
        assert_eq!(host_of("https://markets.ft.com/data/funds"), "markets.ft.com");
        assert_eq!(host_of("not a url"), "");
        assert_eq!(host_of(""), "");
        assert_eq!(host_of("file:///tmp/x"), "");
    }

    #[test]
    fn scheduler_tracks_previous_host() {
        let mut sched = DelayScheduler::new(DelayProfile::interactive());
        assert_eq!(sched.next_delay("https://markets.ft.com/a"), Duration::ZERO);

        let second = sched.next_delay("https://markets.ft.com/b");
        let (min, max) = DelayProfile::interactive().same_domain;
        assert!(second >= Duration::from_millis(min) && second <= Duration::from_millis(max));

        let third = sched.next_delay("https://www.hl.co.uk/f");
        let (min, max) = DelayProfile::interactive().different_domain;
        assert!(third >= Duration::from_millis(min) && third <= Duration::from_millis(max));
    }

    #[test]
    fn reset_starts_a_fresh_sequence() {
        let mut sched = DelayScheduler::new(DelayProfile::interactive());
        sched.next_delay("https://markets.ft.com/a");
        sched.reset();
        assert_eq!(sched.next_delay("https://markets.ft.com/b"), Duration::ZERO);
    }
}
