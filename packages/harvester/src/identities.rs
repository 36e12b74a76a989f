//! Identity rotation.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::traits::session::IdentitySource;
use crate::types::identity::IdentityDescriptor;

/// Round-robin pool of user agent / proxy combinations.
pub struct RotatingIdentityPool {
    descriptors: Vec<IdentityDescriptor>,
    next: AtomicUsize,
}

impl Default for RotatingIdentityPool {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RotatingIdentityPool {
    /// Pool over `descriptors`; an empty list means the default desktop
    /// identity.
    pub fn new(descriptors: Vec<IdentityDescriptor>) -> Self {
        let descriptors = if descriptors.is_empty() {
            vec![IdentityDescriptor::default()]
        } else {
            descriptors
        };
        Self {
            descriptors,
            next: AtomicUsize::new(0),
        }
    }

    /// Pair user agents with proxies, cycling the shorter list.
    pub fn from_lists(user_agents: Vec<String>, proxies: Vec<String>) -> Self {
        let defaults = IdentityDescriptor::default();
        let count = user_agents.len().max(proxies.len());

        let descriptors = (0..count)
            .map(|i| {
                let user_agent = match user_agents.len() {
                    0 => defaults.user_agent.clone(),
                    n => user_agents[i % n].clone(),
                };
                let descriptor = IdentityDescriptor::new(user_agent);
                match proxies.len() {
                    0 => descriptor,
                    n => descriptor.with_proxy(proxies[i % n].clone()),
                }
            })
            .collect();

        Self::new(descriptors)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[async_trait]
impl IdentitySource for RotatingIdentityPool {
    async fn next_identity(&self) -> IdentityDescriptor {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.descriptors.len();
        debug!(slot = i, "rotating identity");
        self.descriptors[i].clone()
    }
}
