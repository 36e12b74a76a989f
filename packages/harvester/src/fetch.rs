//! Fetch-extract worker.
//!
//! One attempt = rate slot → navigate → wait for readiness → expand →
//! extract. Every attempt produces exactly one [`RiskSignal`], which is fed
//! to the rate governor here and handed back to the caller for the session's
//! risk score.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{BrowseError, FetchError, FetchResult};
use crate::rate::{RateGovernor, RiskSignal};
use crate::traits::browser::{Browser, Extractor, PageSnapshot};
use crate::types::{
    config::FetchConfig,
    identity::Identity,
    record::{FieldMap, RawRecord},
    target::TargetId,
};

/// Result of one fetch attempt plus the signal it produced.
#[derive(Debug)]
pub struct FetchAttempt {
    pub result: FetchResult<RawRecord>,
    pub signal: RiskSignal,

    /// When the rate slot was granted; per-attempt deadlines count from here
    pub slot_granted: Instant,
}

/// Drives the browser and extractor for one target at a time.
///
/// Cheap to share: all collaborators are behind `Arc`s.
pub struct FetchWorker {
    browser: Arc<dyn Browser>,
    extractor: Arc<dyn Extractor>,
    governor: Arc<RateGovernor>,
    config: FetchConfig,
}

impl FetchWorker {
    pub fn new(
        browser: Arc<dyn Browser>,
        extractor: Arc<dyn Extractor>,
        governor: Arc<RateGovernor>,
        config: FetchConfig,
    ) -> Self {
        Self {
            browser,
            extractor,
            governor,
            config,
        }
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Fetch and extract one target as `identity`.
    pub async fn fetch(&self, target: &TargetId, identity: &Identity) -> FetchAttempt {
        self.run(target, identity, None).await
    }

    /// Like [`fetch`](Self::fetch), but the work after the rate slot is
    /// granted must finish within `limit`. Time spent queued for the slot
    /// does not count. An overrun still reports [`RiskSignal::Timeout`].
    pub async fn fetch_within(
        &self,
        target: &TargetId,
        identity: &Identity,
        limit: Duration,
    ) -> FetchAttempt {
        self.run(target, identity, Some(limit)).await
    }

    async fn run(
        &self,
        target: &TargetId,
        identity: &Identity,
        limit: Option<Duration>,
    ) -> FetchAttempt {
        self.governor.acquire_slot().await;
        let slot_granted = Instant::now();

        let (result, signal) = match limit {
            None => self.attempt(target, identity).await,
            Some(limit) => match tokio::time::timeout(limit, self.attempt(target, identity)).await {
                Ok(outcome) => outcome,
                Err(_) => (
                    Err(FetchError::DeadlineExceeded {
                        target: target.clone(),
                        limit,
                    }),
                    RiskSignal::Timeout,
                ),
            },
        };
        let delay = self.governor.report_outcome(signal);

        match &result {
            Ok(record) => info!(
                target_id = %target,
                fields = record.fields.len(),
                next_delay_ms = delay.as_millis() as u64,
                "extracted"
            ),
            Err(e) => warn!(
                target_id = %target,
                error = %e,
                ?signal,
                next_delay_ms = delay.as_millis() as u64,
                "fetch attempt failed"
            ),
        }

        FetchAttempt {
            result,
            signal,
            slot_granted,
        }
    }

    async fn attempt(
        &self,
        target: &TargetId,
        identity: &Identity,
    ) -> (FetchResult<RawRecord>, RiskSignal) {
        let navigated = self.browser.navigate(target.as_str(), identity).await;
        let mut page = match navigated {
            Ok(page) => page,
            Err(source) => {
                let signal = match source {
                    BrowseError::Timeout { .. } => RiskSignal::Timeout,
                    // Network trouble still earns a slower next request
                    _ => RiskSignal::SlowResponse(self.config.slow_threshold),
                };
                return (Err(navigation(target, source)), signal);
            }
        };

        if let Some(status) = page.status.filter(|_| page.is_soft_blocked()) {
            return (
                Err(FetchError::SoftBlocked {
                    target: target.clone(),
                    status,
                }),
                RiskSignal::SoftBlock,
            );
        }

        let deadline = Instant::now() + self.config.ready_timeout;
        loop {
            if self.extractor.detect_challenge(&page) {
                return (
                    Err(FetchError::AuthChallenge {
                        target: target.clone(),
                    }),
                    RiskSignal::Challenge,
                );
            }
            if self.extractor.is_ready(&page) {
                break;
            }
            if Instant::now() >= deadline {
                return (
                    Err(FetchError::RenderTimeout {
                        target: target.clone(),
                        waited: self.config.ready_timeout,
                    }),
                    RiskSignal::Timeout,
                );
            }

            tokio::time::sleep(self.config.poll_interval).await;
            page = match self.browser.snapshot(&page).await {
                Ok(page) => page,
                Err(source) => return (Err(navigation(target, source)), RiskSignal::Timeout),
            };
        }

        if self.config.expand_sections {
            page = match self.browser.expand(&page).await {
                Ok(page) => page,
                Err(source) => return (Err(navigation(target, source)), RiskSignal::Timeout),
            };
        }

        let signal = self.latency_signal(&page);
        let fields = usable_fields(self.extractor.extract(&page));
        if fields.is_empty() {
            return (
                Err(FetchError::ExtractionFailed {
                    target: target.clone(),
                    reason: "no usable fields on rendered page".to_string(),
                }),
                signal,
            );
        }

        debug!(target_id = %target, final_url = %page.final_url, "page ready");
        (Ok(RawRecord::new(target.clone(), fields)), signal)
    }

    fn latency_signal(&self, page: &PageSnapshot) -> RiskSignal {
        if page.latency > self.config.slow_threshold {
            RiskSignal::SlowResponse(page.latency)
        } else {
            RiskSignal::Clean
        }
    }
}

fn navigation(target: &TargetId, source: BrowseError) -> FetchError {
    FetchError::Navigation {
        target: target.clone(),
        source,
    }
}

/// Drop fields that carry no visible text.
fn usable_fields(mut fields: FieldMap) -> FieldMap {
    fields.retain(|_, value| !value.is_blank());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{profile_html, MockBrowser, MockExtractor, MockStep};
    use crate::types::config::RateConfig;
    use crate::types::identity::{IdentityDescriptor, SessionGrant};

    const URL: &str = "https://www.linkedin.com/in/ada";

    fn identity() -> Identity {
        Identity::from_grant(
            "me",
            SessionGrant::new("cookie"),
            IdentityDescriptor::default(),
            1,
        )
    }

    fn governor() -> Arc<RateGovernor> {
        let config = RateConfig::default()
            .with_delays(
                Duration::from_millis(10),
                Duration::from_millis(10),
                Duration::from_secs(1),
            )
            .with_jitter(0.0)
            .with_requests_per_minute(None);
        Arc::new(RateGovernor::new(config).unwrap())
    }

    fn worker(browser: MockBrowser) -> FetchWorker {
        FetchWorker::new(
            Arc::new(browser),
            Arc::new(MockExtractor),
            governor(),
            FetchConfig::default()
                .with_ready_timeout(Duration::from_secs(2))
                .with_poll_interval(Duration::from_millis(500)),
        )
    }

    fn target() -> TargetId {
        TargetId::new(URL).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_page_is_extracted() {
        let browser = MockBrowser::new()
            .with_profile(URL, &[("name", "Ada Lovelace"), ("headline", "Analyst")]);
        let attempt = worker(browser).fetch(&target(), &identity()).await;

        let record = attempt.result.unwrap();
        assert_eq!(record.text("name"), Some("Ada Lovelace"));
        assert_eq!(attempt.signal, RiskSignal::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_is_reported() {
        let browser = MockBrowser::new().with_step(URL, MockStep::Challenge);
        let worker = worker(browser);
        let before = worker.governor().current_delay();

        let attempt = worker.fetch(&target(), &identity()).await;
        assert!(matches!(
            attempt.result,
            Err(FetchError::AuthChallenge { .. })
        ));
        assert_eq!(attempt.signal, RiskSignal::Challenge);
        assert!(worker.governor().current_delay() > before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_is_render_timeout() {
        let browser = MockBrowser::new().with_step(URL, MockStep::NeverReady);
        let attempt = worker(browser).fetch(&target(), &identity()).await;

        assert!(matches!(
            attempt.result,
            Err(FetchError::RenderTimeout { .. })
        ));
        assert_eq!(attempt.signal, RiskSignal::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_block_status() {
        let browser = MockBrowser::new().with_step(URL, MockStep::SoftBlock);
        let attempt = worker(browser).fetch(&target(), &identity()).await;

        assert!(matches!(
            attempt.result,
            Err(FetchError::SoftBlocked { status: 999, .. })
        ));
        assert_eq!(attempt.signal, RiskSignal::SoftBlock);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_fields_are_extraction_failure() {
        let browser = MockBrowser::new().with_step(
            URL,
            MockStep::Page {
                html: profile_html(&[("name", "   ")]),
                latency: Duration::ZERO,
            },
        );
        let extractor = MockExtractor;
        // Blank name still "renders", so readiness holds but nothing survives
        assert!(extractor.is_ready(&PageSnapshot::new(URL, profile_html(&[("name", "   ")]))));

        let attempt = worker(browser).fetch(&target(), &identity()).await;
        assert!(matches!(
            attempt.result,
            Err(FetchError::ExtractionFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_page_is_risk_signal() {
        let browser = MockBrowser::new().with_step(
            URL,
            MockStep::Page {
                html: profile_html(&[("name", "Ada")]),
                latency: Duration::from_secs(20),
            },
        );
        let attempt = worker(browser).fetch(&target(), &identity()).await;

        assert!(attempt.result.is_ok());
        assert!(matches!(attempt.signal, RiskSignal::SlowResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_from_slot_and_reports_timeout() {
        let browser = MockBrowser::new()
            .with_profile(URL, &[("name", "Ada")])
            .with_navigation_delay(Duration::from_millis(300));
        let worker = worker(browser);
        let before = worker.governor().current_delay();

        // Fits: the first slot is immediate and navigation takes 300ms
        let attempt = worker
            .fetch_within(&target(), &identity(), Duration::from_millis(400))
            .await;
        assert!(attempt.result.is_ok());

        // Too tight: overrun is reported to the governor like any timeout
        let attempt = worker
            .fetch_within(&target(), &identity(), Duration::from_millis(100))
            .await;
        assert!(matches!(
            attempt.result,
            Err(FetchError::DeadlineExceeded { .. })
        ));
        assert_eq!(attempt.signal, RiskSignal::Timeout);
        assert!(worker.governor().current_delay() > before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_error() {
        let browser = MockBrowser::new().with_step(URL, MockStep::Error("proxy refused".into()));
        let attempt = worker(browser).fetch(&target(), &identity()).await;

        assert!(matches!(attempt.result, Err(FetchError::Navigation { .. })));
    }
}
