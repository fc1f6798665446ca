//! Retry backoff between outbox passes

use async_trait::async_trait;
use bridge_traits::time::Timer;
use core_runtime::config::SyncSettings;
use std::time::Duration;

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// How many waits at `max_delay` are allowed before giving up
    pub max_capped_passes: u32,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Self::default()
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for BackoffPolicy {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            max_capped_passes: settings.max_capped_passes,
        }
    }
}

/// Doubling delay sequence capped at `max_delay`.
///
/// ```
/// use core_sync::backoff::{Backoff, BackoffPolicy};
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(BackoffPolicy {
///     base_delay: Duration::from_millis(100),
///     max_delay: Duration::from_millis(300),
///     max_capped_passes: 1,
/// });
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(300)));
/// assert_eq!(backoff.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
    capped_passes: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            next: policy.base_delay.min(policy.max_delay),
            policy,
            capped_passes: 0,
        }
    }

    /// Delay before the next pass, or `None` once the capped budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.capped_passes >= self.policy.max_capped_passes {
            return None;
        }

        let delay = self.next;
        if delay >= self.policy.max_delay {
            self.capped_passes += 1;
        }
        self.next = delay.saturating_mul(2).min(self.policy.max_delay);
        Some(delay)
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.policy);
    }
}

/// [`Timer`] backed by the Tokio clock
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
