//! Identity & session manager.
//!
//! Owns the one live session identity. Validity is a two-state machine:
//!
//! ```text
//!   VALID ──challenge / expiry hint──▶ EXPIRED ──silent refresh ok──▶ VALID
//!                                         │
//!                                         └─ refused ─▶ AuthRequired (fatal)
//!                                         └─ budget spent ─▶ AuthExpired (fatal)
//! ```
//!
//! Fatal outcomes latch: later callers fail fast with the same error instead
//! of hammering the login endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{AuthError, SessionError, SessionResult};
use crate::rate::RiskSignal;
use crate::traits::{
    kv::KvStore,
    session::{Authenticator, IdentitySource},
};
use crate::types::{
    config::SessionConfig,
    identity::{Identity, IdentityDescriptor, SessionGrant},
};

/// Key under which the current session grant is persisted.
pub const SESSION_KEY: &str = "session:current";

/// Weight of the newest observation in the risk moving average.
const RISK_SMOOTHING: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session has been established or restored yet
    Absent,
    Valid,
    Expired,
    /// A fatal auth failure was surfaced; needs an operator
    Halted,
}

/// Persisted form of a session grant.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    credential_ref: String,
    token: String,
    expires_at: Option<DateTime<Utc>>,
    descriptor: IdentityDescriptor,
    saved_at: DateTime<Utc>,
}

struct SessionInner {
    identity: Option<Identity>,
    status: SessionStatus,
    generation: u64,
    halted: Option<Latch>,
}

/// Fatal outcome replayed to every later caller.
#[derive(Debug, Clone)]
enum Latch {
    Required(String),
    Expired(u32),
}

impl Latch {
    fn from_error(error: &SessionError) -> Option<Self> {
        match error {
            SessionError::AuthRequired { reason } => Some(Self::Required(reason.clone())),
            SessionError::AuthExpired { attempts } => Some(Self::Expired(*attempts)),
            SessionError::Store(_) => None,
        }
    }

    fn replay(&self) -> SessionError {
        match self {
            Self::Required(reason) => SessionError::AuthRequired {
                reason: reason.clone(),
            },
            Self::Expired(attempts) => SessionError::AuthExpired {
                attempts: *attempts,
            },
        }
    }
}

/// Shared session manager.
///
/// `ensure_valid` holds an async lock across login and refresh, so
/// concurrent workers never race a stale session: one refreshes, the rest
/// wait and receive the refreshed identity.
pub struct SessionManager {
    inner: tokio::sync::Mutex<SessionInner>,
    risk: Mutex<f32>,
    authenticator: Arc<dyn Authenticator>,
    identities: Arc<dyn IdentitySource>,
    store: Option<Arc<dyn KvStore>>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        identities: Arc<dyn IdentitySource>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(SessionInner {
                identity: None,
                status: SessionStatus::Absent,
                generation: 0,
                halted: None,
            }),
            risk: Mutex::new(0.0),
            authenticator,
            identities,
            store: None,
            config,
        }
    }

    /// Persist grants to (and restore them from) `store`.
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Restore a previously persisted session, if any.
    ///
    /// The restored session is assumed valid until a fetch says otherwise.
    pub async fn restore(&self) -> SessionResult<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(raw) = store.get(SESSION_KEY).await? else {
            return Ok(false);
        };

        let stored: StoredSession = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable stored session");
                return Ok(false);
            }
        };

        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        let mut grant = SessionGrant::new(stored.token);
        grant.expires_at = stored.expires_at;
        inner.identity = Some(Identity::from_grant(
            stored.credential_ref,
            grant,
            stored.descriptor,
            inner.generation,
        ));
        inner.status = SessionStatus::Valid;
        info!(saved_at = %stored.saved_at, "restored stored session");
        Ok(true)
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.lock().await.status
    }

    /// Current smoothed detection risk.
    pub fn risk_score(&self) -> f32 {
        *self.risk.lock().unwrap()
    }

    /// Return a valid identity, logging in or refreshing as needed.
    pub async fn ensure_valid(&self) -> SessionResult<Identity> {
        let mut inner = self.inner.lock().await;

        if let Some(latch) = &inner.halted {
            return Err(latch.replay());
        }

        let result = match inner.identity.clone() {
            Some(identity) => {
                if inner.status == SessionStatus::Valid && identity.is_expired_at(Utc::now()) {
                    debug!(generation = identity.generation, "session expiry hint passed");
                    inner.status = SessionStatus::Expired;
                }
                if inner.status == SessionStatus::Valid {
                    return Ok(self.with_risk(identity));
                }
                self.refresh_locked(&mut inner, identity).await
            }
            None if self.authenticator.can_login() => self.login_locked(&mut inner).await,
            None => Err(SessionError::AuthRequired {
                reason: "no stored session and login is not possible in this mode".to_string(),
            }),
        };

        match result {
            Ok(identity) => Ok(self.with_risk(identity)),
            Err(e) => {
                if let Some(latch) = Latch::from_error(&e) {
                    inner.status = SessionStatus::Halted;
                    inner.halted = Some(latch);
                }
                Err(e)
            }
        }
    }

    /// VALID → EXPIRED after an authentication challenge.
    ///
    /// Reports against an older generation are ignored: some other worker
    /// already refreshed the session. Returns whether the state changed.
    pub async fn mark_expired(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock().await;
        let current = inner.identity.as_ref().map(|i| i.generation);

        if current == Some(generation) && inner.status == SessionStatus::Valid {
            warn!(generation, "session challenged, marking expired");
            inner.status = SessionStatus::Expired;
            true
        } else {
            debug!(generation, ?current, "stale expiry report ignored");
            false
        }
    }

    /// Fold a fetch outcome into the identity's detection-risk score.
    pub fn record_risk(&self, signal: RiskSignal) -> f32 {
        let observed = if signal.is_risk() { 1.0 } else { 0.0 };
        let mut risk = self.risk.lock().unwrap();
        *risk = (1.0 - RISK_SMOOTHING) * *risk + RISK_SMOOTHING * observed;
        *risk
    }

    fn with_risk(&self, mut identity: Identity) -> Identity {
        identity.risk_score = self.risk_score();
        identity
    }

    async fn login_locked(&self, inner: &mut SessionInner) -> SessionResult<Identity> {
        let descriptor = self.identities.next_identity().await;
        let attempts = self.config.refresh_attempts.max(1);

        for attempt in 1..=attempts {
            match self.authenticator.login(&descriptor).await {
                Ok(grant) => {
                    info!(user_agent = %descriptor.user_agent, "logged in");
                    return self.install(inner, grant, descriptor).await;
                }
                Err(AuthError::Transport(e)) if attempt < attempts => {
                    warn!(attempt, error = %e, "login transport error, retrying");
                    tokio::time::sleep(self.config.refresh_backoff).await;
                }
                Err(e) => {
                    return Err(SessionError::AuthRequired {
                        reason: format!("login failed: {}", e),
                    })
                }
            }
        }

        Err(SessionError::AuthRequired {
            reason: "login attempts exhausted".to_string(),
        })
    }

    async fn refresh_locked(
        &self,
        inner: &mut SessionInner,
        identity: Identity,
    ) -> SessionResult<Identity> {
        let attempts = self.config.refresh_attempts.max(1);

        for attempt in 1..=attempts {
            match self.authenticator.refresh(&identity).await {
                Ok(Some(grant)) => {
                    info!(attempt, "session refreshed");
                    return self.install(inner, grant, identity.descriptor.clone()).await;
                }
                Ok(None) => {
                    return Err(SessionError::AuthRequired {
                        reason: "session refused by site, manual login needed".to_string(),
                    })
                }
                Err(e @ (AuthError::Rejected(_) | AuthError::InteractionRequired)) => {
                    return Err(SessionError::AuthRequired {
                        reason: e.to_string(),
                    })
                }
                Err(AuthError::Transport(e)) => {
                    warn!(attempt, error = %e, "session refresh failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.refresh_backoff).await;
                    }
                }
            }
        }

        Err(SessionError::AuthExpired { attempts })
    }

    async fn install(
        &self,
        inner: &mut SessionInner,
        grant: SessionGrant,
        descriptor: IdentityDescriptor,
    ) -> SessionResult<Identity> {
        inner.generation += 1;
        let identity = Identity::from_grant(
            self.authenticator.credential_ref(),
            grant,
            descriptor,
            inner.generation,
        );

        if self.config.persist {
            if let Some(store) = &self.store {
                let stored = StoredSession {
                    credential_ref: identity.credential_ref.clone(),
                    token: identity.session_token.expose().to_string(),
                    expires_at: identity.expires_at,
                    descriptor: identity.descriptor.clone(),
                    saved_at: Utc::now(),
                };
                let encoded = serde_json::to_string(&stored).map_err(crate::error::StoreError::from)?;
                store.put(SESSION_KEY, &encoded).await?;
            }
        }

        inner.identity = Some(identity.clone());
        inner.status = SessionStatus::Valid;
        Ok(identity)
    }
}
