//! Identity types - who the pipeline appears to be.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::security::credentials::SecretString;

/// Default desktop user agent, matching a stock Chrome build.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Browser fingerprint and network route for one session.
///
/// Handed out by an [`IdentitySource`](crate::traits::session::IdentitySource).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDescriptor {
    pub user_agent: String,

    /// Proxy URL, if traffic should be routed through one
    #[serde(default)]
    pub proxy: Option<String>,

    pub viewport: (u32, u32),
}

impl Default for IdentityDescriptor {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            viewport: (1280, 800),
        }
    }
}

impl IdentityDescriptor {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..Default::default()
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }
}

/// What an authenticator hands back after a login or refresh.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    /// Session cookie / token
    pub token: SecretString,

    /// When the site is expected to expire the session
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionGrant {
    pub fn new(token: impl Into<SecretString>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// A live session identity.
///
/// Owned by the [`SessionManager`](crate::session::SessionManager); workers
/// only ever see clones.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Which account the session belongs to (never the secret itself)
    pub credential_ref: String,

    pub session_token: SecretString,

    pub expires_at: Option<DateTime<Utc>>,

    /// Smoothed detection risk, 0.0 (clean) to 1.0 (flagged)
    pub risk_score: f32,

    pub descriptor: IdentityDescriptor,

    /// Bumped on every login or refresh
    pub generation: u64,
}

impl Identity {
    pub fn from_grant(
        credential_ref: impl Into<String>,
        grant: SessionGrant,
        descriptor: IdentityDescriptor,
        generation: u64,
    ) -> Self {
        Self {
            credential_ref: credential_ref.into(),
            session_token: grant.token,
            expires_at: grant.expires_at,
            risk_score: 0.0,
            descriptor,
            generation,
        }
    }

    /// Whether the expiry hint has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
