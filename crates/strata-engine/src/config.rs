//! Engine configuration
//!
//! Timeouts, requeue intervals and the two policies the reconcile loop leaves
//! configurable: how restart requests are debounced and how failures back off.

use std::str::FromStr;
use std::time::Duration;

use strata_common::Error;

/// How `strata.dev/restart` annotations are honored
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Call `Provider::restart` once per distinct annotation value
    ///
    /// The honored value is recorded in `status.restartObservedMarker`; the
    /// annotation can stay on the object without re-triggering.
    #[default]
    OncePerMarker,
    /// Never call `Provider::restart`
    Disabled,
}

impl FromStr for RestartPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "once-per-marker" | "oncepermarker" => Ok(Self::OncePerMarker),
            "disabled" | "off" => Ok(Self::Disabled),
            _ => Err(Error::validation(format!(
                "invalid restart policy: {s}, expected one of: once-per-marker, disabled"
            ))),
        }
    }
}

/// Backoff applied by `error_policy`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on the delay
    pub max_delay: Duration,
    /// Stop requeuing after this many consecutive failures; `None` retries forever
    ///
    /// Once exceeded the cluster is only reconciled again when it changes.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempt` consecutive failures
    ///
    /// Doubles from `base_delay` and saturates at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// True once `attempt` is past `max_attempts`
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

/// Settings for one engine worker
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Deadline for a single reconcile attempt
    pub reconcile_timeout: Duration,
    /// Requeue interval while the cluster is Running
    pub resync_interval: Duration,
    /// Requeue interval while the cluster is not yet Running
    pub pending_interval: Duration,
    /// Poll interval while the provider reports deletion in progress
    pub delete_poll_interval: Duration,
    /// Consecutive non-retryable failures before status is set to Failed
    pub failure_threshold: u32,
    /// Restart debounce policy
    pub restart_policy: RestartPolicy,
    /// Error backoff
    pub retry: RetryPolicy,
    /// Maximum clusters reconciled concurrently (0 = unbounded)
    pub concurrency: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: Duration::from_secs(60),
            resync_interval: Duration::from_secs(300),
            pending_interval: Duration::from_secs(15),
            delete_poll_interval: Duration::from_secs(10),
            failure_threshold: 3,
            restart_policy: RestartPolicy::default(),
            retry: RetryPolicy::default(),
            concurrency: 0,
        }
    }
}

impl EngineConfig {
    /// Set the per-reconcile deadline
    pub fn reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    /// Set the Running resync interval
    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Set the not-yet-Running requeue interval
    pub fn pending_interval(mut self, interval: Duration) -> Self {
        self.pending_interval = interval;
        self
    }

    /// Set the deletion poll interval
    pub fn delete_poll_interval(mut self, interval: Duration) -> Self {
        self.delete_poll_interval = interval;
        self
    }

    /// Set the failure threshold (clamped to at least 1)
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the restart policy
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set worker concurrency
    pub fn concurrency(mut self, concurrency: u16) -> Self {
        self.concurrency = concurrency;
        self
    }
}
