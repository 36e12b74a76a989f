//! Testing utilities including mock implementations.
//!
//! These are useful for exercising the pipeline without a browser, a model
//! endpoint, or a real account.
//!
//! Mock pages use a tiny line format understood by [`MockExtractor`]:
//! one `name: value` line per field, and a [`CHALLENGE_MARKER`] line for
//! authentication walls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::error::{AuthError, BrowseError, BrowseResult, SummarizeError};
use crate::traits::{
    browser::{Browser, Extractor, PageSnapshot},
    session::{Authenticator, IdentitySource},
    summarizer::Summarizer,
};
use crate::types::{
    config::ModelConfig,
    identity::{Identity, IdentityDescriptor, SessionGrant},
    record::{FieldMap, FieldValue},
};

/// Line that makes [`MockExtractor`] report a challenge.
pub const CHALLENGE_MARKER: &str = "<!-- authwall -->";

/// Render fields in the mock page format.
pub fn profile_html(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}: {}\n", name, value))
        .collect()
}

/// What the mock browser does for one navigation.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Serve this body
    Page { html: String, latency: Duration },
    /// Serve a login wall
    Challenge,
    /// Serve a page that never becomes ready
    NeverReady,
    /// Answer with status 999
    SoftBlock,
    /// Driver-level navigation timeout
    Timeout,
    /// Transport failure
    Error(String),
}

impl MockStep {
    pub fn profile(fields: &[(&str, &str)]) -> Self {
        Self::Page {
            html: profile_html(fields),
            latency: Duration::ZERO,
        }
    }
}

/// A mock browser serving scripted pages by URL.
///
/// Queued steps (`with_step`) are consumed first; after that the URL's
/// default page (`with_profile`) is served on every navigation.
#[derive(Default)]
pub struct MockBrowser {
    queued: RwLock<HashMap<String, VecDeque<MockStep>>>,
    defaults: RwLock<HashMap<String, MockStep>>,
    navigation_delay: Duration,
    navigations: RwLock<Vec<String>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `fields` for `url` whenever nothing is queued.
    pub fn with_profile(self, url: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        self.defaults
            .write()
            .unwrap()
            .insert(url.into(), MockStep::profile(fields));
        self
    }

    /// Queue a one-shot step for `url`.
    pub fn with_step(self, url: impl Into<String>, step: MockStep) -> Self {
        self.queued
            .write()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(step);
        self
    }

    /// Sleep this long inside every navigation.
    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    /// All navigated URLs, in call order.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.read().unwrap().clone()
    }

    pub fn navigation_count(&self, url: &str) -> usize {
        self.navigations
            .read()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    fn next_step(&self, url: &str) -> Option<MockStep> {
        if let Some(step) = self
            .queued
            .write()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front())
        {
            return Some(step);
        }
        self.defaults.read().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn navigate(&self, url: &str, _identity: &Identity) -> BrowseResult<PageSnapshot> {
        self.navigations.write().unwrap().push(url.to_string());
        if !self.navigation_delay.is_zero() {
            tokio::time::sleep(self.navigation_delay).await;
        }

        let step = self.next_step(url).ok_or_else(|| {
            BrowseError::Transport(format!("no page scripted for {}", url).into())
        })?;

        match step {
            MockStep::Page { html, latency } => {
                Ok(PageSnapshot::new(url, html).with_latency(latency))
            }
            MockStep::Challenge => Ok(PageSnapshot::new(url, CHALLENGE_MARKER)
                .with_final_url("https://www.linkedin.com/authwall")),
            MockStep::NeverReady => Ok(PageSnapshot::new(url, "")),
            MockStep::SoftBlock => Ok(PageSnapshot::new(url, "").with_status(999)),
            MockStep::Timeout => Err(BrowseError::Timeout {
                url: url.to_string(),
            }),
            MockStep::Error(message) => Err(BrowseError::Transport(message.into())),
        }
    }
}

/// Extractor for the mock page format.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockExtractor;

impl Extractor for MockExtractor {
    fn extract(&self, page: &PageSnapshot) -> FieldMap {
        page.html
            .lines()
            .filter(|line| *line != CHALLENGE_MARKER)
            .filter_map(|line| line.split_once(": "))
            .map(|(name, value)| (name.to_string(), FieldValue::Text(value.to_string())))
            .collect()
    }

    fn detect_challenge(&self, page: &PageSnapshot) -> bool {
        page.html.lines().any(|line| line == CHALLENGE_MARKER)
    }
}

/// Record of a call made to the mock summarizer.
#[derive(Debug, Clone)]
pub struct SummarizeCall {
    pub text: String,
    pub instructions: String,
}

#[derive(Debug, Clone, Default)]
enum SummaryBehavior {
    /// `summary-<word count>`, always one token
    #[default]
    WordCount,
    /// Return the input unchanged
    Echo,
    Fixed(String),
}

/// A mock summarization model with call tracking.
#[derive(Default)]
pub struct MockSummarizer {
    behavior: SummaryBehavior,
    fail_on: Option<String>,
    calls: RwLock<Vec<SummarizeCall>>,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return every input unchanged (never shrinks, so merges never converge).
    pub fn echo() -> Self {
        Self {
            behavior: SummaryBehavior::Echo,
            ..Default::default()
        }
    }

    /// Always answer with `response`.
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.behavior = SummaryBehavior::Fixed(response.into());
        self
    }

    /// Fail any call whose input contains `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }

    pub fn calls(&self) -> Vec<SummarizeCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, text: &str, config: &ModelConfig) -> Result<String, SummarizeError> {
        self.calls.write().unwrap().push(SummarizeCall {
            text: text.to_string(),
            instructions: config.instructions.clone(),
        });

        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                return Err(SummarizeError::Service(
                    format!("mock failure on {:?}", needle).into(),
                ));
            }
        }

        Ok(match &self.behavior {
            SummaryBehavior::WordCount => format!("summary-{}", text.split_whitespace().count()),
            SummaryBehavior::Echo => text.to_string(),
            SummaryBehavior::Fixed(response) => response.clone(),
        })
    }
}

/// A scripted authenticator with call counters.
pub struct MockAuthenticator {
    token: String,
    can_login: bool,
    refuse_refresh: bool,
    logins: AtomicU32,
    refreshes: AtomicU32,
}

impl MockAuthenticator {
    /// Authenticator that logs in and refreshes successfully.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            can_login: true,
            refuse_refresh: false,
            logins: AtomicU32::new(0),
            refreshes: AtomicU32::new(0),
        }
    }

    /// Headful-only mode: no unattended login.
    pub fn without_login(mut self) -> Self {
        self.can_login = false;
        self
    }

    /// The site refuses every silent refresh.
    pub fn refusing_refresh(mut self) -> Self {
        self.refuse_refresh = true;
        self
    }

    pub fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    fn credential_ref(&self) -> String {
        "mock-account".to_string()
    }

    fn can_login(&self) -> bool {
        self.can_login
    }

    async fn login(&self, _descriptor: &IdentityDescriptor) -> Result<SessionGrant, AuthError> {
        if !self.can_login {
            return Err(AuthError::InteractionRequired);
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionGrant::new(format!("{}-{}", self.token, n)))
    }

    async fn refresh(&self, _identity: &Identity) -> Result<Option<SessionGrant>, AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refuse_refresh {
            return Ok(None);
        }
        Ok(Some(SessionGrant::new(format!("{}-r{}", self.token, n))))
    }
}

/// Identity source that always hands out the same descriptor.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentitySource {
    descriptor: IdentityDescriptor,
}

impl StaticIdentitySource {
    pub fn new(descriptor: IdentityDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl IdentitySource for StaticIdentitySource {
    async fn next_identity(&self) -> IdentityDescriptor {
        self.descriptor.clone()
    }
}
