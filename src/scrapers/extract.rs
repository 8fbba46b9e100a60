//! Selector waits and text extraction on a loaded page.

use std::time::Duration;

use chromiumoxide::{Element, Page};
use tracing::trace;

use super::error::{ErrorCode, ScrapeError};

/// Poll interval while waiting for a selector to appear.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Title of the page, if one can be read. Attached to failures so an
/// operator can tell a markup change from a block page.
pub async fn page_title(page: &Page) -> Option<String> {
    page.get_title().await.ok().flatten()
}

/// Wait for a selector to appear, polling until the timeout.
///
/// Script-heavy pages attach the value element well after navigation
/// settles, so a single immediate query is not enough.
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, ScrapeError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match page.find_element(selector).await {
            Ok(element) => return Ok(element),
            Err(e) => {
                trace!("selector {:?} not present yet: {}", selector, e);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            let title = page_title(page).await;
            return Err(ScrapeError::new(
                ErrorCode::SelectorTimeout,
                format!(
                    "selector {:?} did not appear within {}s",
                    selector,
                    timeout.as_secs()
                ),
            )
            .with_title(title));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Extract the inner text of the first element matching `selector`.
///
/// An element that appears but has no text is reported as
/// `SELECTOR_NOT_FOUND` (the selector matched the wrong node), distinct from
/// `SELECTOR_TIMEOUT` (the element never appeared at all).
pub async fn extract_text(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<String, ScrapeError> {
    let element = wait_for_element(page, selector, timeout).await?;

    let text = element
        .inner_text()
        .await
        .map_err(|e| {
            ScrapeError::new(ErrorCode::BrowserError, format!("inner text: {e}"))
        })?
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    match text {
        Some(text) => Ok(text),
        None => {
            let title = page_title(page).await;
            Err(ScrapeError::new(
                ErrorCode::SelectorNotFound,
                format!("selector {:?} matched an element with no text", selector),
            )
            .with_title(title))
        }
    }
}
