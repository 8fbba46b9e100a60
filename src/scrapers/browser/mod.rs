//! Stealth browser session management.
//!
//! One `BrowserSession` is shared across all targets in a run. Pages are
//! created per target, pre-configured to resist automation fingerprinting:
//! rotated user agent with matching client hints, per-domain referers,
//! pre-seeded consent cookies and pre-navigation stealth patches.

mod config;
mod stealth;

pub use config::BrowserEngineConfig;
pub use stealth::{random_profile, stealth_script, UserAgentProfile};

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, SetCookiesParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::delay::host_of;
use super::error::{classify_navigation_error, ErrorCode, ScrapeError};
use super::sites::{SiteTables, WaitStrategy};

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

/// Pause after the navigation settles on script-heavy pages, so late XHR
/// responses have rendered before we query the selector.
const QUIESCENT_SETTLE: Duration = Duration::from_secs(2);

/// A launched (or remotely attached) browser plus its CDP event pump.
///
/// The owner must call `close` on every exit path; the orchestrator does so
/// in its cleanup block.
pub struct BrowserSession {
    config: BrowserEngineConfig,
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
}

impl BrowserSession {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            browser: None,
            handler_task: None,
        }
    }

    /// Find a Chrome/Chromium executable.
    fn find_chrome() -> Result<std::path::PathBuf, ScrapeError> {
        for path in CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                debug!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        debug!("Found Chrome in PATH: {}", path);
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }

        Err(ScrapeError::new(
            ErrorCode::BrowserError,
            "Chrome/Chromium not found; install it or set browser.remote_url",
        ))
    }

    /// Launch the browser (or connect to a remote one) if not already running.
    pub async fn launch(&mut self) -> Result<(), ScrapeError> {
        if self.browser.is_some() {
            return Ok(());
        }

        if let Some(remote_url) = self.config.remote_url.clone() {
            return self.connect_remote(&remote_url).await;
        }

        info!("Launching browser (headless={})", self.config.headless);

        let chrome_path = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .request_timeout(Duration::from_secs(90));

        // with_head means NOT headless, confusingly
        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--metrics-recording-only")
            .arg("--lang=en-GB")
            .arg("--window-size=1920,1080")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScrapeError::new(ErrorCode::BrowserError, format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
            ScrapeError::new(ErrorCode::BrowserError, format!("failed to launch browser: {e}"))
        })?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(browser);
        self.handler_task = Some(handle);

        Ok(())
    }

    /// Connect to a remote Chrome instance by probing its /json/version
    /// endpoint for the WebSocket debugger URL.
    async fn connect_remote(&mut self, url: &str) -> Result<(), ScrapeError> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url.replace("ws://", "http://").replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let client = reqwest::Client::new();
        let resp: serde_json::Value = client
            .get(&version_url)
            .send()
            .await
            .map_err(|e| {
                ScrapeError::new(ErrorCode::BrowserError, format!("remote browser probe: {e}"))
            })?
            .json()
            .await
            .map_err(|e| {
                ScrapeError::new(ErrorCode::BrowserError, format!("remote browser version: {e}"))
            })?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ScrapeError::new(ErrorCode::BrowserError, "no webSocketDebuggerUrl in response")
            })?;

        let (browser, mut handler) = Browser::connect(ws_url).await.map_err(|e| {
            ScrapeError::new(ErrorCode::BrowserError, format!("remote browser connect: {e}"))
        })?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(browser);
        self.handler_task = Some(handle);

        Ok(())
    }

    /// Whether the browser process still answers. A cheap CDP round-trip;
    /// used mid-run to detect a crashed browser and relaunch instead of
    /// failing every remaining target.
    pub async fn is_alive(&self) -> bool {
        match &self.browser {
            Some(browser) => browser.pages().await.is_ok(),
            None => false,
        }
    }

    /// Drop the dead browser and launch a fresh one.
    pub async fn relaunch(&mut self) -> Result<(), ScrapeError> {
        warn!("Browser no longer responding, relaunching");
        self.close().await;
        self.launch().await
    }

    /// Create a page pre-configured for a target URL: rotated user agent
    /// with matching client hints, consent cookies for the target's domain,
    /// and stealth patches injected before any page script runs.
    pub async fn new_page(&self, sites: &SiteTables, target_url: &str) -> Result<Page, ScrapeError> {
        let browser = self.browser.as_ref().ok_or_else(|| {
            ScrapeError::new(ErrorCode::BrowserError, "browser not launched")
        })?;

        let page = browser.new_page("about:blank").await.map_err(|e| {
            ScrapeError::new(ErrorCode::BrowserError, format!("new page: {e}"))
        })?;

        let profile = random_profile();

        // User agent first (before any navigation), with client-hint fields
        // kept consistent with it.
        let ua_override = SetUserAgentOverrideParams::builder()
            .user_agent(profile.user_agent)
            .accept_language(profile.accept_language)
            .platform(profile.platform)
            .build()
            .map_err(|e| ScrapeError::new(ErrorCode::BrowserError, format!("ua override: {e}")))?;
        page.execute(ua_override).await.map_err(|e| {
            ScrapeError::new(ErrorCode::BrowserError, format!("set user agent: {e}"))
        })?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(stealth_script(
            &profile,
        )))
        .await
        .map_err(|e| {
            ScrapeError::new(ErrorCode::BrowserError, format!("stealth injection: {e}"))
        })?;

        let host = host_of(target_url);
        let mut cookies = Vec::new();
        for cookie in sites.consent_cookies_for(&host) {
            match CookieParam::builder()
                .name(&cookie.name)
                .value(&cookie.value)
                .domain(&cookie.domain)
                .build()
            {
                Ok(param) => cookies.push(param),
                Err(e) => warn!("Failed to build consent cookie {}: {}", cookie.name, e),
            }
        }
        if !cookies.is_empty() {
            if let Err(e) = page.execute(SetCookiesParams::new(cookies)).await {
                warn!("Failed to seed consent cookies for {}: {}", host, e);
            }
        }

        Ok(page)
    }

    /// Navigate with the wait strategy for the URL. A referer from the
    /// per-domain table is sent with the request. Timeouts come from the
    /// strategy unless the caller overrides them.
    pub async fn navigate(
        &self,
        sites: &SiteTables,
        page: &Page,
        url: &str,
        wait: WaitStrategy,
        timeout_override: Option<Duration>,
    ) -> Result<(), ScrapeError> {
        let referer = sites.referer_for(&host_of(url)).to_string();
        let params = NavigateParams::builder()
            .url(url)
            .referrer(referer)
            .build()
            .map_err(|e| ScrapeError::new(ErrorCode::BrowserError, format!("navigate params: {e}")))?;

        let timeout = timeout_override.unwrap_or_else(|| wait.navigation_timeout());

        let navigation = async {
            let response = page.execute(params).await.map_err(|e| {
                ScrapeError::new(classify_navigation_error(&e.to_string()), e.to_string())
            })?;

            // Net-level failures come back in the command result, not as a
            // protocol error.
            if let Some(error_text) = response
                .result
                .error_text
                .as_deref()
                .filter(|t| !t.is_empty())
            {
                return Err(ScrapeError::new(
                    classify_navigation_error(error_text),
                    format!("navigation failed: {error_text}"),
                ));
            }

            // DOM-parsed wait: poll document.readyState instead of relying on
            // load-event plumbing, which misbehaves on some provider pages.
            let ready_script = r#"
                new Promise((resolve) => {
                    if (document.readyState === 'complete' || document.readyState === 'interactive') {
                        resolve(document.readyState);
                    } else {
                        document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                        setTimeout(() => resolve('timeout'), 10000);
                    }
                })
            "#;
            if let Err(e) = page.evaluate(ready_script.to_string()).await {
                debug!("Could not check ready state: {}", e);
            }

            if wait == WaitStrategy::NetworkQuiescent {
                // Script-heavy sites keep fetching after the DOM is parsed;
                // wait for navigation to settle, then let late XHRs render.
                if let Err(e) = page.wait_for_navigation().await {
                    debug!("Navigation settle wait: {}", e);
                }
                tokio::time::sleep(QUIESCENT_SETTLE).await;
            }

            Ok::<(), ScrapeError>(())
        };

        tokio::time::timeout(timeout, navigation).await.map_err(|_| {
            ScrapeError::new(
                ErrorCode::NavigationTimeout,
                format!("navigation to {url} exceeded {}s", timeout.as_secs()),
            )
        })?
    }

    /// Close the browser and stop the event pump. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Browser close: {}", e);
            }
        }
        if let Some(handle) = self.handler_task.take() {
            handle.abort();
        }
    }
}
