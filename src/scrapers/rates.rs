//! Currency exchange rate fetching.
//!
//! Unlike prices and benchmarks, rates come from a JSON endpoint: one
//! request covers every configured currency, which is why a currency retry
//! just re-runs the whole fetch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::error::{ErrorCode, ScrapeError};

/// Default rates endpoint (ECB reference rates, no API key).
pub const DEFAULT_RATES_ENDPOINT: &str = "https://api.frankfurter.app/latest";

/// Seam for the rate fetch so orchestrator tests can stub it.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    /// Fetch the rate of each symbol against `base`, in one request.
    async fn fetch(
        &self,
        base: &str,
        symbols: &[String],
    ) -> Result<HashMap<String, f64>, ScrapeError>;
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

/// Production fetcher against a frankfurter-style JSON endpoint.
pub struct HttpRateFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRateFetcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl RateFetcher for HttpRateFetcher {
    async fn fetch(
        &self,
        base: &str,
        symbols: &[String],
    ) -> Result<HashMap<String, f64>, ScrapeError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!(
            "{}?base={}&symbols={}",
            self.endpoint,
            base,
            symbols.join(",")
        );
        debug!("Fetching rates: {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            let code = if e.is_timeout() {
                ErrorCode::NavigationTimeout
            } else {
                ErrorCode::NetworkError
            };
            ScrapeError::new(code, format!("rates request: {e}"))
        })?;

        if !response.status().is_success() {
            return Err(ScrapeError::new(
                ErrorCode::NetworkError,
                format!("rates endpoint returned HTTP {}", response.status()),
            ));
        }

        let body: RatesResponse = response.json().await.map_err(|e| {
            ScrapeError::new(ErrorCode::ParseError, format!("rates response: {e}"))
        })?;

        Ok(body.rates)
    }
}
