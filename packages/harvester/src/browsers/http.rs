//! Plain-HTTP browser driver.
//!
//! Fetches server-rendered HTML with the identity's user agent, proxy and
//! session cookie. There is no live DOM, so `snapshot` and `expand` are the
//! trait defaults and readiness is decided on the first response.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::error::{BrowseError, BrowseResult};
use crate::traits::browser::{Browser, PageSnapshot};
use crate::types::{config::BrowserOptions, identity::Identity};

/// Name of the site's session cookie.
pub const SESSION_COOKIE: &str = "li_at";

/// Cookie header value for a session token.
///
/// Tokens may be stored bare (`AQED...`) or as full cookie pairs
/// (`li_at=AQED...; JSESSIONID=...`).
pub fn cookie_header(token: &str) -> String {
    if token.contains('=') {
        token.to_string()
    } else {
        format!("{}={}", SESSION_COOKIE, token)
    }
}

/// HTTP browser built on `reqwest`.
///
/// One client per proxy route, created lazily.
pub struct HttpBrowser {
    options: BrowserOptions,
    clients: RwLock<HashMap<Option<String>, reqwest::Client>>,
}

impl HttpBrowser {
    pub fn new(options: BrowserOptions) -> Self {
        if !options.headless {
            warn!("headful mode requested but the HTTP driver has no window; running headless");
        }
        Self {
            options,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &BrowserOptions {
        &self.options
    }

    fn client(&self, proxy: Option<&str>) -> BrowseResult<reqwest::Client> {
        let key = proxy.map(str::to_string);
        if let Some(client) = self.clients.read().unwrap().get(&key) {
            return Ok(client.clone());
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.5"),
        );

        let mut builder = reqwest::Client::builder()
            .timeout(self.options.nav_timeout)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| BrowseError::Transport(Box::new(e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| BrowseError::Transport(Box::new(e)))?;
        self.clients.write().unwrap().insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn navigate(&self, url: &str, identity: &Identity) -> BrowseResult<PageSnapshot> {
        let parsed = Url::parse(url).map_err(|_| BrowseError::InvalidUrl {
            url: url.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BrowseError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let client = self.client(identity.descriptor.proxy.as_deref())?;
        let started = Instant::now();

        debug!(url = %url, "HTTP navigate");
        let response = client
            .get(parsed)
            .header(reqwest::header::USER_AGENT, &identity.descriptor.user_agent)
            .header(
                reqwest::header::COOKIE,
                cookie_header(identity.session_token.expose()),
            )
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrowseError::Timeout {
                        url: url.to_string(),
                    }
                } else {
                    BrowseError::Transport(Box::new(e))
                }
            })?;

        // Soft blocks come back as ordinary responses; the worker inspects
        // the status.
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| BrowseError::Transport(Box::new(e)))?;

        Ok(PageSnapshot {
            url: url.to_string(),
            final_url,
            status: Some(status),
            html,
            latency: started.elapsed(),
            captured_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::identity::{IdentityDescriptor, SessionGrant};

    #[test]
    fn test_cookie_header_forms() {
        assert_eq!(cookie_header("AQEDtoken"), "li_at=AQEDtoken");
        assert_eq!(cookie_header("li_at=abc; JSESSIONID=x"), "li_at=abc; JSESSIONID=x");
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let browser = HttpBrowser::new(BrowserOptions::default());
        let identity = Identity::from_grant(
            "me",
            SessionGrant::new("t"),
            IdentityDescriptor::default(),
            1,
        );

        let err = browser.navigate("file:///etc/passwd", &identity).await.unwrap_err();
        assert!(matches!(err, BrowseError::InvalidUrl { .. }));

        let err = browser.navigate("not a url", &identity).await.unwrap_err();
        assert!(matches!(err, BrowseError::InvalidUrl { .. }));
    }
}
