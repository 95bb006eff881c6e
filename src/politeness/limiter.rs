use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::debug;

use super::delays::DomainDelayTable;

/// Per-domain cooldown store.
///
/// A domain is in cooldown from the moment a request to it is admitted until
/// its effective delay has passed.
#[derive(Debug)]
pub struct PolitenessLimiter {
    delays: Arc<DomainDelayTable>,
    cooldowns: RwLock<HashMap<String, Instant>>,
}

impl PolitenessLimiter {
    pub fn new(delays: Arc<DomainDelayTable>) -> Self {
        Self {
            delays,
            cooldowns: RwLock::new(HashMap::new()),
        }
    }

    pub fn delays(&self) -> &Arc<DomainDelayTable> {
        &self.delays
    }

    /// Start the cooldown for `domain` now
    pub fn add(&self, domain: &str) {
        let domain = domain.to_ascii_lowercase();
        let delay = self.delays.effective_delay(&domain);
        let expires_at = Instant::now() + Duration::from_millis(delay);

        let mut cooldowns = self
            .cooldowns
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let slot = cooldowns.entry(domain.clone()).or_insert(expires_at);
        if *slot < expires_at {
            *slot = expires_at;
        }
        debug!("Domain {} added to cooldown for {}ms", domain, delay);
    }

    /// True when no unexpired cooldown exists for `domain`
    pub fn is_allowed(&self, domain: &str) -> bool {
        let now = Instant::now();
        self.cooldowns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&domain.to_ascii_lowercase())
            .map_or(true, |expires_at| *expires_at <= now)
    }

    /// Enforced delay for `domain` in milliseconds
    pub fn delay_for_domain(&self, domain: &str) -> u64 {
        self.delays.effective_delay(domain)
    }

    /// Time left until `domain` leaves its cooldown
    pub fn remaining(&self, domain: &str) -> Duration {
        let now = Instant::now();
        self.cooldowns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&domain.to_ascii_lowercase())
            .map_or(Duration::ZERO, |expires_at| {
                expires_at.saturating_duration_since(now)
            })
    }

    /// Drop expired cooldown records, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut cooldowns = self
            .cooldowns
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = cooldowns.len();
        cooldowns.retain(|_, expires_at| *expires_at > now);
        before - cooldowns.len()
    }

    pub fn tracked_domains(&self) -> usize {
        self.cooldowns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Periodically sweep expired records; stops once the limiter is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!("Swept {} expired politeness cooldowns", removed);
                }
            }
        })
    }
}
