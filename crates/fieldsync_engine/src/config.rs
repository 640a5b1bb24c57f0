//! Configuration for the sync engine.

use fieldsync_protocol::ConflictPolicy;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the sync server.
    pub server_url: String,
    /// Device identifier sent with every request.
    pub device_id: String,
    /// Entity types pulled during the delta phase, in pull order.
    pub tracked_types: Vec<String>,
    /// Maximum queue items per push batch.
    pub push_batch_size: usize,
    /// Maximum changes per delta page.
    pub pull_batch_size: u32,
    /// Policy applied to version conflicts.
    pub policy: ConflictPolicy,
    /// Retry configuration for failed queue items.
    pub retry: RetryConfig,
    /// Interval for periodic background sync, None for event-driven only.
    pub sync_interval: Option<Duration>,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            device_id: device_id.into(),
            tracked_types: Vec::new(),
            push_batch_size: 50,
            pull_batch_size: 100,
            policy: ConflictPolicy::ServerWins,
            retry: RetryConfig::default(),
            sync_interval: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the entity types to pull.
    pub fn with_tracked_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the pull page size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size.max(1);
        self
    }

    /// Sets the conflict policy.
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the interval for periodic background sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for retry behavior.
///
/// Retry state lives in the queue rows, not in memory, so a restart resumes
/// the backoff schedule instead of hammering the server from zero.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before an item is marked terminally failed.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// The wait before the next attempt of an item that has failed
    /// `failures` times. Zero failures means the item is due immediately.
    pub fn delay_after_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(failures.saturating_sub(1).min(i32::MAX as u32) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// True if an item that last failed at `last_attempt_at` (milliseconds)
    /// with `failures` failures is due for another attempt at `now`.
    pub fn is_due(&self, failures: u32, last_attempt_at: Option<i64>, now: i64) -> bool {
        match last_attempt_at {
            None => true,
            Some(last) => {
                let wait = self.delay_after_failures(failures).as_millis().min(i64::MAX as u128) as i64;
                now >= last.saturating_add(wait)
            }
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
