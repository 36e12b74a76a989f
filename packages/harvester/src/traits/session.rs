//! Identity rotation and authentication traits.

use async_trait::async_trait;

use crate::error::AuthError;
use crate::types::identity::{Identity, IdentityDescriptor, SessionGrant};

/// Proxy / user-agent rotation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Descriptor for the next session to be established.
    async fn next_identity(&self) -> IdentityDescriptor;
}

/// Login and silent refresh against the target site.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Account label used in logs and on the identity.
    fn credential_ref(&self) -> String;

    /// Whether `login` can run without an operator in the current mode.
    fn can_login(&self) -> bool;

    /// Establish a brand new session.
    async fn login(&self, descriptor: &IdentityDescriptor) -> Result<SessionGrant, AuthError>;

    /// Cookie-based silent refresh.
    ///
    /// `Ok(None)` means the site definitively refused the session and a
    /// human has to log in again.
    async fn refresh(&self, identity: &Identity) -> Result<Option<SessionGrant>, AuthError>;
}
