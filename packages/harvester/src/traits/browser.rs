//! Browser automation and field extraction traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::BrowseResult;
use crate::types::{identity::Identity, record::FieldMap};

/// A rendered DOM snapshot.
///
/// For headless-browser drivers `html` is the serialized live DOM; for plain
/// HTTP drivers it is the response body.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// URL that was requested
    pub url: String,

    /// URL after redirects
    pub final_url: String,

    /// HTTP status of the main document, when known
    pub status: Option<u16>,

    pub html: String,

    /// Time from request to first snapshot
    pub latency: Duration,

    pub captured_at: DateTime<Utc>,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status: Some(200),
            html: html.into(),
            latency: Duration::ZERO,
            captured_at: Utc::now(),
        }
    }

    pub fn with_final_url(mut self, url: impl Into<String>) -> Self {
        self.final_url = url.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Rate-limit or soft-block status codes (999 is the site's own).
    pub fn is_soft_blocked(&self) -> bool {
        matches!(self.status, Some(429) | Some(999))
    }
}

/// Browser automation driver.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Navigate to `url` as `identity` and return the first snapshot.
    async fn navigate(&self, url: &str, identity: &Identity) -> BrowseResult<PageSnapshot>;

    /// Re-read the DOM of an already navigated page.
    ///
    /// Drivers without a live DOM return the snapshot unchanged.
    async fn snapshot(&self, page: &PageSnapshot) -> BrowseResult<PageSnapshot> {
        Ok(page.clone())
    }

    /// Scroll and click "see more" controls to surface lazily-loaded
    /// sections.
    async fn expand(&self, page: &PageSnapshot) -> BrowseResult<PageSnapshot> {
        Ok(page.clone())
    }
}

/// Field extraction rules over a rendered page.
pub trait Extractor: Send + Sync {
    /// Pull raw fields out of the page. Empty map = nothing usable.
    fn extract(&self, page: &PageSnapshot) -> FieldMap;

    /// Whether the page is an authentication challenge (login wall,
    /// checkpoint, captcha).
    fn detect_challenge(&self, page: &PageSnapshot) -> bool;

    /// Readiness predicate: the content we extract has rendered.
    fn is_ready(&self, page: &PageSnapshot) -> bool {
        !self.extract(page).is_empty()
    }
}
