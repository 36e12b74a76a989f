//! Rate-governed profile acquisition with cached, token-bounded summarization.
//!
//! Takes a worklist of profile targets, fetches each one through a browser
//! driver under a shared session and a shared rate governor, extracts raw
//! fields, summarizes them in chunks that fit the model's token budget, and
//! records every outcome in a durable cache so re-runs never redo finished
//! work.
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvester::{CacheStore, MemoryKv, Orchestrator, PipelineConfig};
//!
//! let cache = CacheStore::new(Arc::new(MemoryKv::new()));
//! let orchestrator = Orchestrator::new(cache, session, fetcher, summarizer, PipelineConfig::default());
//! let report = orchestrator.run(targets).await?;
//! println!("{} done, {} failed", report.done.len(), report.failed.len());
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams to the browser, extractor, model, auth and storage
//! - [`types`] - Targets, records, identities and configuration
//! - [`cache`] - Per-target state machine over a key-value store
//! - [`rate`] - Adaptive rate governor
//! - [`session`] - Identity and session manager
//! - [`fetch`] - Fetch-extract worker
//! - [`pipeline`] - Chunking, summarization and the orchestrator
//! - [`stores`], [`browsers`], [`identities`], [`auth`], [`ai`] - Reference adapters
//! - [`testing`] - Mock implementations for testing

pub mod ai;
pub mod auth;
pub mod browsers;
pub mod cache;
pub mod error;
pub mod export;
pub mod fetch;
pub mod identities;
pub mod pipeline;
pub mod rate;
pub mod security;
pub mod session;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    AuthError, BrowseError, ChunkError, ConfigError, FailureKind, FetchError, HarvestError,
    SessionError, StoreError, SummarizeError,
};
pub use traits::{
    browser::{Browser, Extractor, PageSnapshot},
    kv::KvStore,
    session::{Authenticator, IdentitySource},
    summarizer::Summarizer,
};
pub use types::{
    config::{
        BrowserOptions, ChunkConfig, FetchConfig, MergeStrategy, ModelConfig, PipelineConfig,
        RateConfig, SessionConfig,
    },
    identity::{Identity, IdentityDescriptor, SessionGrant},
    record::{CacheStatus, CachedRecord, FieldMap, FieldValue, RawRecord, Summary},
    target::TargetId,
};

pub use cache::{CacheCounts, CacheStore, ReserveMode};
pub use fetch::{FetchAttempt, FetchWorker};
pub use rate::{RateGovernor, RiskSignal};
pub use session::{SessionManager, SessionStatus};

pub use pipeline::{
    chunk_text, serialize_record, CharRatioTokenizer, Chunk, ChunkingSummarizer, Orchestrator,
    RunReport, TargetOutcome, Tokenizer, WordTokenizer,
};

// Re-export adapters
pub use auth::CookieAuthenticator;
pub use browsers::{HttpBrowser, ProfileExtractor, ProfileSearch};
pub use export::{export_profiles, ExportedProfile, ProfileExport};
pub use identities::RotatingIdentityPool;
pub use security::{LoginCredentials, SecretString};
pub use stores::MemoryKv;

#[cfg(feature = "sqlite")]
pub use stores::SqliteKv;

#[cfg(feature = "openai")]
pub use ai::OpenAiSummarizer;
