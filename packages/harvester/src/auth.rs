//! Cookie-based authenticator.
//!
//! Sessions come from either a configured session cookie or a form login
//! with account credentials. A session is considered live when the feed
//! page renders one of the logged-in navigation markers.

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::browsers::http::{cookie_header, SESSION_COOKIE};
use crate::error::AuthError;
use crate::security::{LoginCredentials, SecretString};
use crate::traits::session::Authenticator;
use crate::types::identity::{Identity, IdentityDescriptor, SessionGrant};

const DEFAULT_BASE_URL: &str = "https://www.linkedin.com";

/// Elements only present for a logged-in member.
const LOGGED_IN_MARKERS: &[&str] = &[
    "div.feed-identity-module",
    "div.global-nav__me",
    "input[placeholder='Search']",
    "li.global-nav__primary-item",
    "div.search-global-typeahead",
];

/// Redirect targets that mean the session was not accepted.
const LOGGED_OUT_PATHS: &[&str] = &["/login", "/authwall", "/uas/login"];

/// Whether `html` shows any logged-in marker.
pub fn is_logged_in(html: &str) -> bool {
    let document = Html::parse_document(html);
    LOGGED_IN_MARKERS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .any(|selector| document.select(&selector).next().is_some())
}

/// CSRF token embedded in the login form.
pub fn login_csrf_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("input[name='loginCsrfParam']").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
}

/// Authenticator over a session cookie and/or account credentials.
pub struct CookieAuthenticator {
    cookie: Option<SecretString>,
    credentials: Option<LoginCredentials>,
    base_url: String,
    timeout: Duration,
}

impl Default for CookieAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieAuthenticator {
    pub fn new() -> Self {
        Self {
            cookie: None,
            credentials: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Use an existing session cookie (`li_at` value or full cookie pairs).
    pub fn with_cookie(mut self, cookie: impl Into<SecretString>) -> Self {
        let cookie = cookie.into();
        if !cookie.is_empty() {
            self.cookie = Some(cookie);
        }
        self
    }

    /// Allow unattended form login.
    pub fn with_credentials(mut self, credentials: LoginCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set a custom base URL (for staging or a local stub).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(
        &self,
        descriptor: &IdentityDescriptor,
        jar: Option<Arc<Jar>>,
    ) -> Result<reqwest::Client, AuthError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(descriptor.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5));
        if let Some(jar) = jar {
            builder = builder.cookie_provider(jar);
        }
        if let Some(proxy) = &descriptor.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| AuthError::Transport(Box::new(e)))?;
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(|e| AuthError::Transport(Box::new(e)))
    }

    /// Check whether `token` still opens the feed.
    async fn validate(&self, token: &str, descriptor: &IdentityDescriptor) -> Result<bool, AuthError> {
        let client = self.client(descriptor, None)?;
        let response = client
            .get(format!("{}/feed/", self.base_url))
            .header(reqwest::header::COOKIE, cookie_header(token))
            .send()
            .await
            .map_err(|e| AuthError::Transport(Box::new(e)))?;

        let final_url = response.url().to_string();
        if LOGGED_OUT_PATHS.iter().any(|p| final_url.contains(p)) {
            debug!(final_url = %final_url, "session redirected to login");
            return Ok(false);
        }

        let html = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(Box::new(e)))?;
        Ok(is_logged_in(&html))
    }

    /// Username/password login through the site's login form.
    async fn form_login(
        &self,
        credentials: &LoginCredentials,
        descriptor: &IdentityDescriptor,
    ) -> Result<SessionGrant, AuthError> {
        let jar = Arc::new(Jar::default());
        let client = self.client(descriptor, Some(jar.clone()))?;

        let login_page = client
            .get(format!("{}/login", self.base_url))
            .send()
            .await
            .map_err(|e| AuthError::Transport(Box::new(e)))?
            .text()
            .await
            .map_err(|e| AuthError::Transport(Box::new(e)))?;
        let csrf = login_csrf_token(&login_page)
            .ok_or_else(|| AuthError::Rejected("login form not found".to_string()))?;

        let response = client
            .post(format!("{}/checkpoint/lg/login-submit", self.base_url))
            .form(&[
                ("session_key", credentials.username.as_str()),
                ("session_password", credentials.password.expose()),
                ("loginCsrfParam", csrf.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Transport(Box::new(e)))?;

        if response.url().path().contains("/checkpoint/challenge") {
            warn!(account = %credentials.username, "login needs a human (checkpoint)");
            return Err(AuthError::InteractionRequired);
        }

        let base = Url::parse(&self.base_url)
            .map_err(|e| AuthError::Rejected(format!("bad base URL: {}", e)))?;
        let session = jar
            .cookies(&base)
            .and_then(|header| header.to_str().ok().map(str::to_string))
            .and_then(|cookies| {
                cookies
                    .split("; ")
                    .find(|pair| pair.starts_with(&format!("{}=", SESSION_COOKIE)))
                    .map(str::to_string)
            })
            .ok_or_else(|| AuthError::Rejected("no session cookie issued".to_string()))?;

        info!(account = %credentials.username, "form login succeeded");
        Ok(SessionGrant::new(session))
    }
}

#[async_trait]
impl Authenticator for CookieAuthenticator {
    fn credential_ref(&self) -> String {
        match &self.credentials {
            Some(credentials) => credentials.username.clone(),
            None => "session-cookie".to_string(),
        }
    }

    fn can_login(&self) -> bool {
        self.cookie.is_some() || self.credentials.is_some()
    }

    async fn login(&self, descriptor: &IdentityDescriptor) -> Result<SessionGrant, AuthError> {
        if let Some(cookie) = &self.cookie {
            if self.validate(cookie.expose(), descriptor).await? {
                info!("configured session cookie accepted");
                return Ok(SessionGrant::new(cookie.clone()));
            }
            warn!("configured session cookie rejected");
        }

        match &self.credentials {
            Some(credentials) => self.form_login(credentials, descriptor).await,
            None if self.cookie.is_some() => {
                Err(AuthError::Rejected("session cookie not accepted".to_string()))
            }
            None => Err(AuthError::InteractionRequired),
        }
    }

    async fn refresh(&self, identity: &Identity) -> Result<Option<SessionGrant>, AuthError> {
        let token = identity.session_token.expose();
        if self.validate(token, &identity.descriptor).await? {
            debug!("session still valid");
            return Ok(Some(SessionGrant {
                token: identity.session_token.clone(),
                expires_at: identity.expires_at,
            }));
        }

        match &self.credentials {
            Some(credentials) => match self.form_login(credentials, &identity.descriptor).await {
                Ok(grant) => Ok(Some(grant)),
                Err(AuthError::Transport(e)) => Err(AuthError::Transport(e)),
                Err(e) => {
                    warn!(error = %e, "re-login refused");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logged_in_markers() {
        assert!(is_logged_in(r#"<div class="global-nav__me"><img></div>"#));
        assert!(is_logged_in(r#"<input type="text" placeholder="Search">"#));
        assert!(!is_logged_in(r#"<form class="login__form"></form>"#));
    }

    #[test]
    fn test_csrf_token_parsing() {
        let html = r#"<form><input type="hidden" name="loginCsrfParam" value="abc-123"></form>"#;
        assert_eq!(login_csrf_token(html).as_deref(), Some("abc-123"));
        assert_eq!(login_csrf_token("<form></form>"), None);
    }

    #[test]
    fn test_login_ability_follows_configuration() {
        assert!(!CookieAuthenticator::new().can_login());
        assert!(!CookieAuthenticator::new().with_cookie("").can_login());
        assert!(CookieAuthenticator::new().with_cookie("AQED").can_login());

        let auth = CookieAuthenticator::new()
            .with_credentials(LoginCredentials::new("me@example.com", "pw"));
        assert!(auth.can_login());
        assert_eq!(auth.credential_ref(), "me@example.com");
    }

    #[tokio::test]
    async fn test_login_without_anything_needs_a_human() {
        let err = CookieAuthenticator::new()
            .login(&IdentityDescriptor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InteractionRequired));
    }
}
