//! Pipeline orchestrator - drives a worklist through reserve → session →
//! fetch → summarize → commit.
//!
//! # Stop semantics
//!
//! The global stop token and the internal halt token (cancelled on a fatal
//! auth failure) behave the same way:
//! - targets not yet started are reported as not started
//! - in-flight attempts run to completion, so there are no partial commits
//! - a target caught between attempts is marked FAILED/`Interrupted`

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStore, ReserveMode};
use crate::error::{FailureKind, FetchError, HarvestError, Result};
use crate::fetch::{FetchAttempt, FetchWorker};
use crate::pipeline::summarize::ChunkingSummarizer;
use crate::session::SessionManager;
use crate::traits::kv::KvStore;
use crate::types::{
    config::PipelineConfig,
    record::{CacheStatus, RawRecord, Summary},
    target::TargetId,
};

/// What happened to one target in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Done { attempts: u32 },
    Failed { kind: FailureKind, attempts: u32 },
    /// DONE, FAILED or held by another worker
    Skipped { status: Option<CacheStatus> },
    /// Run stopped or halted before this target was picked up
    NotStarted,
}

/// Summary of one run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub run_id: Uuid,
    pub done: Vec<TargetId>,
    pub failed: Vec<(TargetId, FailureKind)>,
    pub skipped: Vec<TargetId>,
    pub not_started: Vec<TargetId>,

    /// Entries from crashed runs turned FAILED/`Interrupted` at start
    pub recovered: Vec<TargetId>,

    /// Fatal kind that halted the run, if any
    pub halted: Option<FailureKind>,

    /// Whether the global stop signal fired
    pub stopped: bool,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.halted.is_none() && !self.stopped
    }

    pub fn total(&self) -> usize {
        self.done.len() + self.failed.len() + self.skipped.len() + self.not_started.len()
    }

    fn record(&mut self, target: TargetId, outcome: TargetOutcome) {
        match outcome {
            TargetOutcome::Done { .. } => self.done.push(target),
            TargetOutcome::Failed { kind, .. } => self.failed.push((target, kind)),
            TargetOutcome::Skipped { .. } => self.skipped.push(target),
            TargetOutcome::NotStarted => self.not_started.push(target),
        }
    }
}

/// Runs worklists against shared session, rate and cache state.
pub struct Orchestrator<K: KvStore + ?Sized> {
    cache: CacheStore<K>,
    session: Arc<SessionManager>,
    fetcher: Arc<FetchWorker>,
    summarizer: Arc<ChunkingSummarizer>,
    config: PipelineConfig,
    stop: CancellationToken,
}

impl<K: KvStore + ?Sized> Orchestrator<K> {
    pub fn new(
        cache: CacheStore<K>,
        session: Arc<SessionManager>,
        fetcher: Arc<FetchWorker>,
        summarizer: Arc<ChunkingSummarizer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cache,
            session,
            fetcher,
            summarizer,
            config,
            stop: CancellationToken::new(),
        }
    }

    /// Use an externally owned stop token (e.g. wired to Ctrl-C).
    pub fn with_stop_token(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// Token that stops the run when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn cache(&self) -> &CacheStore<K> {
        &self.cache
    }

    /// Process `worklist` with up to `config.concurrency` targets in flight.
    ///
    /// Duplicate ids are processed once. Only storage failures during crash
    /// recovery abort the run; everything else lands in the report.
    pub async fn run(&self, worklist: Vec<TargetId>) -> Result<RunReport> {
        let recovered = self.cache.recover_interrupted().await?;
        let halt = self.stop.child_token();

        let mut seen = std::collections::HashSet::new();
        let worklist: Vec<TargetId> = worklist
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        info!(
            run_id = %self.cache.run_id(),
            targets = worklist.len(),
            concurrency = self.config.concurrency,
            recovered = recovered.len(),
            "run started"
        );

        let outcomes: Vec<(TargetId, TargetOutcome, Option<FailureKind>)> =
            stream::iter(worklist)
                .map(|target| {
                    let halt = halt.clone();
                    async move {
                        let (outcome, fatal) = self.process(&target, &halt).await;
                        (target, outcome, fatal)
                    }
                })
                .buffered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut report = RunReport {
            run_id: self.cache.run_id(),
            recovered,
            stopped: self.stop.is_cancelled(),
            ..Default::default()
        };
        for (target, outcome, fatal) in outcomes {
            if report.halted.is_none() {
                report.halted = fatal;
            }
            report.record(target, outcome);
        }

        info!(
            done = report.done.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            not_started = report.not_started.len(),
            halted = ?report.halted,
            stopped = report.stopped,
            "run finished"
        );
        Ok(report)
    }

    /// Run one target to a terminal state. Also returns the fatal kind if
    /// this target halted the run.
    async fn process(
        &self,
        target: &TargetId,
        halt: &CancellationToken,
    ) -> (TargetOutcome, Option<FailureKind>) {
        if halt.is_cancelled() {
            return (TargetOutcome::NotStarted, None);
        }

        let mode = ReserveMode {
            force_refresh: self.config.force_refresh,
            retry_failed: self.config.retry_failed,
        };
        match self.cache.reserve(target, mode).await {
            Ok(true) => {}
            Ok(false) => {
                let status = self.cache.get(target).await.ok().flatten().map(|e| e.status);
                info!(target_id = %target, ?status, "skipped");
                return (TargetOutcome::Skipped { status }, None);
            }
            Err(e) => {
                error!(target_id = %target, error = %e, "reservation failed");
                return (
                    TargetOutcome::Failed {
                        kind: FailureKind::Storage,
                        attempts: 0,
                    },
                    None,
                );
            }
        }

        let mut attempts = 0;
        loop {
            if halt.is_cancelled() {
                let outcome = self
                    .finish_failed(target, FailureKind::Interrupted, "run stopped", attempts)
                    .await;
                return (outcome, None);
            }

            attempts += 1;
            let error = match self.attempt(target).await {
                Ok((raw, summary)) => return (self.finish_done(target, raw, summary, attempts).await, None),
                Err(e) => e,
            };

            let kind = error.kind();
            if kind.is_fatal() {
                error!(target_id = %target, error = %error, "fatal auth failure, halting run");
                halt.cancel();
                let outcome = self.finish_failed(target, kind, error.to_string(), attempts).await;
                return (outcome, Some(kind));
            }

            if !kind.is_retryable() || attempts >= self.config.max_attempts {
                let outcome = self
                    .finish_failed(target, kind.terminal(), error.to_string(), attempts)
                    .await;
                return (outcome, None);
            }

            let delay = self.retry_delay(attempts);
            warn!(
                target_id = %target,
                attempt = attempts,
                kind = %kind,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = halt.cancelled() => {}
            }
        }
    }

    /// One end-to-end attempt: session, fetch, summarize.
    ///
    /// `target_timeout` counts from the moment the rate slot is granted, so
    /// waiting behind other workers for a slot never times a target out.
    async fn attempt(&self, target: &TargetId) -> Result<(RawRecord, Summary)> {
        let identity = self.session.ensure_valid().await?;

        let limit = self.config.target_timeout;
        let FetchAttempt {
            result,
            signal,
            slot_granted,
        } = self.fetcher.fetch_within(target, &identity, limit).await;
        self.session.record_risk(signal);

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                if matches!(e, FetchError::AuthChallenge { .. }) {
                    self.session.mark_expired(identity.generation).await;
                }
                return Err(e.into());
            }
        };

        let summary = tokio::time::timeout_at(slot_granted + limit, self.summarizer.summarize(&raw))
            .await
            .map_err(|_| HarvestError::TargetTimeout(limit))??;
        Ok((raw, summary))
    }

    async fn finish_done(
        &self,
        target: &TargetId,
        raw: RawRecord,
        summary: Summary,
        attempts: u32,
    ) -> TargetOutcome {
        match self.cache.commit(target, raw, summary, attempts).await {
            Ok(()) => TargetOutcome::Done { attempts },
            Err(e) => {
                error!(target_id = %target, error = %e, "commit failed");
                self.finish_failed(target, FailureKind::Storage, e.to_string(), attempts)
                    .await
            }
        }
    }

    async fn finish_failed(
        &self,
        target: &TargetId,
        kind: FailureKind,
        reason: impl Into<String>,
        attempts: u32,
    ) -> TargetOutcome {
        if let Err(e) = self.cache.fail(target, kind, reason, attempts).await {
            // Left PENDING; the next run recovers it as Interrupted
            error!(target_id = %target, kind = %kind, error = %e, "could not record failure");
        }
        TargetOutcome::Failed { kind, attempts }
    }

    /// `retry_delay * 2^(attempt - 1)`.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.config.retry_delay.saturating_mul(1 << exponent)
    }
}
