//! Typed errors for the harvester library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so the orchestrator can
//! route each failure to the right retry policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::target::TargetId;

/// Terminal or per-attempt failure classification.
///
/// This is what gets persisted on a FAILED cache entry and reported in the
/// run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No usable session and no way to log in without an operator
    AuthRequired,
    /// Session refresh exhausted its retry budget
    AuthExpired,
    /// Page never became ready within the readiness timeout
    RenderTimeout,
    /// Extraction produced no usable data
    ExtractionFailed,
    /// A single indivisible unit exceeds the token budget
    BudgetExceeded,
    /// A summarization call failed
    SummarizationFailed,
    /// Navigation itself failed (network, proxy, driver)
    NavigationFailed,
    /// The whole attempt exceeded the per-target timeout
    TargetTimeout,
    /// Run stopped or crashed while the target was in flight
    Interrupted,
    /// Cache or key-value store failure
    Storage,
}

impl FailureKind {
    /// Whether the orchestrator may retry within the per-target budget.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RenderTimeout
                | Self::ExtractionFailed
                | Self::SummarizationFailed
                | Self::NavigationFailed
                | Self::TargetTimeout
        )
    }

    /// Whether this failure halts the whole run.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::AuthRequired | Self::AuthExpired)
    }

    /// Kind recorded once the retry budget is spent.
    ///
    /// Render timeouts degrade to `ExtractionFailed` after exhaustion.
    pub fn terminal(self) -> Self {
        match self {
            Self::RenderTimeout => Self::ExtractionFailed,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::AuthExpired => "auth_expired",
            Self::RenderTimeout => "render_timeout",
            Self::ExtractionFailed => "extraction_failed",
            Self::BudgetExceeded => "budget_exceeded",
            Self::SummarizationFailed => "summarization_failed",
            Self::NavigationFailed => "navigation_failed",
            Self::TargetTimeout => "target_timeout",
            Self::Interrupted => "interrupted",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by a single pipeline attempt for one target.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Session layer failure
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Fetch/extract failure
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Chunking could not satisfy the token budget
    #[error("chunking failed: {0}")]
    Chunk(#[from] ChunkError),

    /// Summarization service failure
    #[error("summarization failed: {0}")]
    Summarize(#[from] SummarizeError),

    /// Cache or key-value store failure
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Attempt exceeded the per-target timeout
    #[error("target timed out after {0:?}")]
    TargetTimeout(Duration),
}

impl HarvestError {
    /// Classify this error for retry and persistence.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Session(SessionError::AuthRequired { .. }) => FailureKind::AuthRequired,
            Self::Session(SessionError::AuthExpired { .. }) => FailureKind::AuthExpired,
            Self::Session(SessionError::Store(_)) => FailureKind::Storage,
            Self::Fetch(FetchError::RenderTimeout { .. }) => FailureKind::RenderTimeout,
            Self::Fetch(FetchError::ExtractionFailed { .. }) => FailureKind::ExtractionFailed,
            // A challenge fails this attempt only; the next attempt goes
            // through session refresh.
            Self::Fetch(FetchError::AuthChallenge { .. }) => FailureKind::NavigationFailed,
            Self::Fetch(FetchError::SoftBlocked { .. }) => FailureKind::ExtractionFailed,
            Self::Fetch(FetchError::DeadlineExceeded { .. }) => FailureKind::TargetTimeout,
            Self::Fetch(FetchError::Navigation { .. }) => FailureKind::NavigationFailed,
            Self::Chunk(ChunkError::BudgetExceeded { .. }) => FailureKind::BudgetExceeded,
            Self::Chunk(ChunkError::Empty) => FailureKind::ExtractionFailed,
            Self::Summarize(_) => FailureKind::SummarizationFailed,
            Self::Store(_) => FailureKind::Storage,
            Self::TargetTimeout(_) => FailureKind::TargetTimeout,
        }
    }
}

/// Errors from the identity and session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operator intervention needed (no stored session, refresh refused)
    #[error("authentication required: {reason}")]
    AuthRequired { reason: String },

    /// Silent refresh failed repeatedly
    #[error("session expired after {attempts} refresh attempts")]
    AuthExpired { attempts: u32 },

    /// Persisting or loading the session grant failed
    #[error("session store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by an [`Authenticator`](crate::traits::session::Authenticator).
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credentials or cookies were rejected outright
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// Login needs a human (captcha, 2FA, checkpoint)
    #[error("interactive login required")]
    InteractionRequired,

    /// Transport failure talking to the login endpoint
    #[error("auth transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the fetch-extract worker.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The page showed an authentication challenge
    #[error("authentication challenge at {target}")]
    AuthChallenge { target: TargetId },

    /// Readiness predicate never held
    #[error("render timeout for {target} after {waited:?}")]
    RenderTimeout { target: TargetId, waited: Duration },

    /// No usable fields
    #[error("extraction failed for {target}: {reason}")]
    ExtractionFailed { target: TargetId, reason: String },

    /// Site answered with a rate-limit / soft-block status
    #[error("soft block (status {status}) at {target}")]
    SoftBlocked { target: TargetId, status: u16 },

    /// Attempt ran past its deadline after the rate slot was granted
    #[error("fetch of {target} exceeded {limit:?}")]
    DeadlineExceeded { target: TargetId, limit: Duration },

    /// Browser/driver failure
    #[error("navigation failed for {target}: {source}")]
    Navigation {
        target: TargetId,
        #[source]
        source: BrowseError,
    },
}

/// Errors raised by a [`Browser`](crate::traits::browser::Browser).
#[derive(Debug, Error)]
pub enum BrowseError {
    /// HTTP or driver transport failure
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Navigation took longer than the driver allows
    #[error("navigation timeout: {url}")]
    Timeout { url: String },

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

/// Errors from chunking a record's serialized text.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// One indivisible unit is larger than the budget on its own
    #[error("unit of {tokens} tokens exceeds budget of {budget}: {preview:?}")]
    BudgetExceeded {
        tokens: usize,
        budget: usize,
        preview: String,
    },

    /// Nothing to chunk
    #[error("record has no text to summarize")]
    Empty,
}

/// Errors raised by a [`Summarizer`](crate::traits::summarizer::Summarizer).
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// Model endpoint failure
    #[error("model service error: {0}")]
    Service(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Model returned nothing usable
    #[error("empty model response")]
    EmptyResponse,

    /// Merge could not converge within the depth limit
    #[error("merge did not converge within depth {depth}")]
    MergeDepth { depth: usize },

    /// Configuration error (missing key, bad model)
    #[error("config error: {0}")]
    Config(String),
}

/// Errors from the key-value layer and the cache store built on it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Stored value could not be decoded
    #[error("corrupt value under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Raw record / summary do not belong to this entry
    #[error("incompatible record for {target}: {reason}")]
    IncompatibleRecord { target: TargetId, reason: String },

    /// Transition not allowed from the current state
    #[error("invalid transition for {target}: {from} -> {to}")]
    InvalidTransition {
        target: TargetId,
        from: String,
        to: String,
    },

    /// A concurrent writer changed the entry under us
    #[error("concurrent modification of {target}")]
    Conflict { target: TargetId },

    /// JSON encoding error
    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Inconsistent library configuration, caught at construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("floor delay {floor:?} exceeds max delay {max:?}")]
    InvertedBounds { floor: Duration, max: Duration },

    #[error("initial delay {initial:?} outside [{floor:?}, {max:?}]")]
    InitialOutOfRange {
        initial: Duration,
        floor: Duration,
        max: Duration,
    },

    #[error("backoff factor must be > 1.0, got {0}")]
    BackoffFactor(f64),

    #[error("decay factor must be in (0, 1), got {0}")]
    DecayFactor(f64),

    #[error("decay_after must be at least 1")]
    DecayAfter,

    #[error("jitter must be in [0, 1], got {0}")]
    Jitter(f64),
}

/// Result type alias for pipeline attempts.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for browser operations.
pub type BrowseResult<T> = std::result::Result<T, BrowseError>;

/// Result type alias for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
