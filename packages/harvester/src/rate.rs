//! Rate governor - adaptive inter-request delay with a hard budget.
//!
//! Two independent limits apply to every request:
//! - an adaptive delay between granted slots that backs off on
//!   detection-risk signals and decays on clean fetches, always within
//!   `[floor_delay, max_delay]`
//! - an optional requests-per-minute quota enforced with the governor crate

use governor::{Quota, RateLimiter};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::types::config::RateConfig;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Outcome of one request, as seen from the detection side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskSignal {
    /// Normal page, normal latency
    Clean,
    /// Login wall, checkpoint, or captcha
    Challenge,
    /// Latency well above normal
    SlowResponse(Duration),
    /// 429/999 style soft block
    SoftBlock,
    /// Page never rendered
    Timeout,
}

impl RiskSignal {
    pub fn is_risk(&self) -> bool {
        !matches!(self, Self::Clean)
    }
}

/// Snapshot of the governor's process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateState {
    pub current_delay: Duration,
    pub consecutive_failures: u32,
    pub consecutive_clean: u32,
    pub last_request: Option<Instant>,
}

/// Shared rate governor.
///
/// Share one instance (behind an `Arc`) across all workers: slots are
/// granted one at a time, in arrival order.
pub struct RateGovernor {
    config: RateConfig,
    state: Mutex<RateState>,
    /// Serializes `acquire_slot` callers; holds the last grant time.
    slot: tokio::sync::Mutex<Option<Instant>>,
    budget: Option<DefaultRateLimiter>,
}

impl RateGovernor {
    /// Create a governor. Fails if the configured bounds are inconsistent.
    pub fn new(config: RateConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let budget = config
            .requests_per_minute
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            state: Mutex::new(RateState {
                current_delay: config.initial_delay,
                consecutive_failures: 0,
                consecutive_clean: 0,
                last_request: None,
            }),
            slot: tokio::sync::Mutex::new(None),
            budget,
            config,
        })
    }

    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    pub fn state(&self) -> RateState {
        *self.state.lock().unwrap()
    }

    pub fn current_delay(&self) -> Duration {
        self.state.lock().unwrap().current_delay
    }

    /// Wait until the current delay has elapsed since the last granted slot,
    /// then until the request budget allows one more request.
    pub async fn acquire_slot(&self) {
        let mut last = self.slot.lock().await;

        if let Some(previous) = *last {
            let delay = self.current_delay();
            let wait = delay + self.jitter(delay);
            let ready_at = previous + wait;
            if ready_at > Instant::now() {
                debug!(delay_ms = wait.as_millis() as u64, "waiting for rate slot");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        if let Some(budget) = &self.budget {
            budget.until_ready().await;
        }

        let now = Instant::now();
        *last = Some(now);
        self.state.lock().unwrap().last_request = Some(now);
    }

    /// Feed one request outcome back into the delay. Returns the new delay.
    pub fn report_outcome(&self, signal: RiskSignal) -> Duration {
        let mut state = self.state.lock().unwrap();

        if signal.is_risk() {
            let next = state
                .current_delay
                .mul_f64(self.config.backoff_factor)
                .min(self.config.max_delay);
            state.current_delay = next;
            state.consecutive_failures += 1;
            state.consecutive_clean = 0;
            warn!(
                ?signal,
                delay_ms = next.as_millis() as u64,
                failures = state.consecutive_failures,
                "detection risk, backing off"
            );
        } else {
            state.consecutive_failures = 0;
            state.consecutive_clean += 1;
            if state.consecutive_clean >= self.config.decay_after {
                let next = state
                    .current_delay
                    .mul_f64(self.config.decay_factor)
                    .max(self.config.floor_delay);
                if next != state.current_delay {
                    debug!(delay_ms = next.as_millis() as u64, "clean streak, decaying delay");
                }
                state.current_delay = next;
                state.consecutive_clean = 0;
            }
        }

        state.current_delay
    }

    fn jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return Duration::ZERO;
        }
        delay.mul_f64(self.config.jitter * fastrand::f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateConfig {
        RateConfig::default()
            .with_delays(
                Duration::from_millis(100),
                Duration::from_millis(400),
                Duration::from_secs(5),
            )
            .with_backoff_factor(2.0)
            .with_decay(0.5, 2)
            .with_jitter(0.0)
            .with_requests_per_minute(None)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = config().with_backoff_factor(0.5);
        assert!(matches!(
            RateGovernor::new(bad),
            Err(ConfigError::BackoffFactor(f)) if f == 0.5
        ));
    }

    #[test]
    fn test_backoff_converges_to_max() {
        let governor = RateGovernor::new(config()).unwrap();
        let mut previous = governor.current_delay();

        for _ in 0..50 {
            let delay = governor.report_outcome(RiskSignal::Challenge);
            assert!(delay <= Duration::from_secs(5));
            assert!(delay >= previous);
            previous = delay;
        }

        assert_eq!(governor.current_delay(), Duration::from_secs(5));
        assert_eq!(governor.state().consecutive_failures, 50);
    }

    #[test]
    fn test_decay_converges_to_floor() {
        let governor = RateGovernor::new(config()).unwrap();
        for _ in 0..10 {
            governor.report_outcome(RiskSignal::SoftBlock);
        }

        for _ in 0..100 {
            let delay = governor.report_outcome(RiskSignal::Clean);
            assert!(delay >= Duration::from_millis(100));
        }

        assert_eq!(governor.current_delay(), Duration::from_millis(100));
        assert_eq!(governor.state().consecutive_failures, 0);
    }

    #[test]
    fn test_decay_needs_a_full_clean_streak() {
        let governor = RateGovernor::new(config()).unwrap();

        // One clean outcome is not enough with decay_after = 2
        governor.report_outcome(RiskSignal::Clean);
        assert_eq!(governor.current_delay(), Duration::from_millis(400));

        // A risk signal resets the streak
        governor.report_outcome(RiskSignal::Timeout);
        assert_eq!(governor.current_delay(), Duration::from_millis(800));
        governor.report_outcome(RiskSignal::Clean);
        assert_eq!(governor.current_delay(), Duration::from_millis(800));
        governor.report_outcome(RiskSignal::Clean);
        assert_eq!(governor.current_delay(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_are_spaced_by_current_delay() {
        let governor = RateGovernor::new(config()).unwrap();

        let start = Instant::now();
        governor.acquire_slot().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        governor.acquire_slot().await;
        assert!(start.elapsed() >= Duration::from_millis(400));

        governor.report_outcome(RiskSignal::Challenge);
        let before = Instant::now();
        governor.acquire_slot().await;
        assert!(before.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let governor = std::sync::Arc::new(RateGovernor::new(config()).unwrap());
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let governor = governor.clone();
                tokio::spawn(async move { governor.acquire_slot().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // First slot is immediate, the other three each wait a full delay
        assert!(start.elapsed() >= Duration::from_millis(1200));
    }
}
