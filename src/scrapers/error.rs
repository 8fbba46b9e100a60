//! Scrape error taxonomy.
//!
//! Every failure is isolated to its target; none of these abort a run.
//! Codes are stable strings stored on attempt records so operators can
//! distinguish "site changed its markup" from "site blocked us".

use thiserror::Error;

/// Stable error codes for attempt history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No URL could be resolved for the target (configuration gap, not retried).
    NoUrl,
    /// A URL resolved but no selector did (configuration gap, not retried).
    NoSelector,
    /// Navigation did not complete within the wait strategy's timeout.
    NavigationTimeout,
    /// Navigation failed at the network level (DNS, connection reset, ...).
    NetworkError,
    /// The browser engine itself failed (launch, crash, protocol error).
    BrowserError,
    /// The page loaded but the selector matched an element with no usable text.
    SelectorNotFound,
    /// The page loaded but the expected element never appeared. Usually means
    /// the page structure changed.
    SelectorTimeout,
    /// Content was found but did not parse as a number.
    ParseError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoUrl => "NO_URL",
            ErrorCode::NoSelector => "NO_SELECTOR",
            ErrorCode::NavigationTimeout => "NAVIGATION_TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::BrowserError => "BROWSER_ERROR",
            ErrorCode::SelectorNotFound => "SELECTOR_NOT_FOUND",
            ErrorCode::SelectorTimeout => "SELECTOR_TIMEOUT",
            ErrorCode::ParseError => "PARSE_ERROR",
        }
    }

    /// Configuration gaps cannot be fixed by retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCode::NoUrl | ErrorCode::NoSelector)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified scrape failure, with optional page-title diagnostics.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ScrapeError {
    pub code: ErrorCode,
    pub message: String,
    /// Title observed on the page, when navigation got that far.
    pub page_title: Option<String>,
}

impl ScrapeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            page_title: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.page_title = title;
        self
    }

    /// Append a fallback-path failure to this (primary) failure so the whole
    /// chain stays visible to operators. The primary code is preserved.
    pub fn with_fallback_failure(mut self, stage: &str, other: &ScrapeError) -> Self {
        self.message = format!("{}; {} fallback: {}", self.message, stage, other);
        self
    }

    /// Full diagnostic message, including the page title when one was seen.
    pub fn diagnostic(&self) -> String {
        match &self.page_title {
            Some(title) => format!("{} (page title: {:?})", self.message, title),
            None => self.message.clone(),
        }
    }
}

/// Classify a browser/CDP failure by inspecting its message.
///
/// chromiumoxide surfaces navigation timeouts, net-level failures and
/// protocol errors through one error type, so the distinction has to be
/// made from the text.
pub fn classify_navigation_error(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        ErrorCode::NavigationTimeout
    } else if lower.contains("net::")
        || lower.contains("dns")
        || lower.contains("connection")
        || lower.contains("name_not_resolved")
        || lower.contains("internet_disconnected")
    {
        ErrorCode::NetworkError
    } else {
        ErrorCode::BrowserError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_timeouts() {
        assert_eq!(
            classify_navigation_error("Request timed out after 45s"),
            ErrorCode::NavigationTimeout
        );
        assert_eq!(
            classify_navigation_error("navigation Timeout exceeded"),
            ErrorCode::NavigationTimeout
        );
    }

    #[test]
    fn classifies_network_failures() {
        assert_eq!(
            classify_navigation_error("net::ERR_NAME_NOT_RESOLVED"),
            ErrorCode::NetworkError
        );
        assert_eq!(
            classify_navigation_error("connection refused"),
            ErrorCode::NetworkError
        );
    }

    #[test]
    fn everything_else_is_a_browser_error() {
        assert_eq!(
            classify_navigation_error("websocket closed unexpectedly"),
            ErrorCode::BrowserError
        );
    }

    #[test]
    fn fallback_failures_append_not_replace() {
        let primary = ScrapeError::new(ErrorCode::SelectorTimeout, "price never appeared");
        let alt = ScrapeError::new(ErrorCode::NavigationTimeout, "alternate URL timed out");
        let chained = primary.with_fallback_failure("alternate currency", &alt);

        assert_eq!(chained.code, ErrorCode::SelectorTimeout);
        assert!(chained.message.contains("price never appeared"));
        assert!(chained.message.contains("alternate currency fallback"));
        assert!(chained.message.contains("NAVIGATION_TIMEOUT"));
    }

    #[test]
    fn config_gaps_are_not_retryable() {
        assert!(!ErrorCode::NoUrl.is_retryable());
        assert!(!ErrorCode::NoSelector.is_retryable());
        assert!(ErrorCode::SelectorTimeout.is_retryable());
        assert!(ErrorCode::NetworkError.is_retryable());
    }
}
