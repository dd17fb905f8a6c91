use std::time::Duration;

use crate::config::MonitorConfig;

/// Exponential backoff for automatic re-validation after a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReevaluationPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
}

impl Default for ReevaluationPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10 * 60),
        }
    }
}

impl ReevaluationPolicy {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        let initial_delay = Duration::from_millis(cfg.initial_reevaluate_delay_ms);
        Self {
            initial_delay,
            max_delay: Duration::from_millis(cfg.max_reevaluate_delay_ms).max(initial_delay),
        }
    }

    /// Delay before the next re-check after `failures` consecutive failed cycles.
    ///
    /// `failures` is 1-based; 0 is treated as 1.
    pub fn delay_for(&self, failures: u32) -> Duration {
        // initial * 2^(failures-1), capped.
        let exp = 1u32 << failures.saturating_sub(1).min(20);
        self.initial_delay.saturating_mul(exp).min(self.max_delay)
    }
}

/// Consecutive-failure counter driving [`ReevaluationPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    policy: ReevaluationPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: ReevaluationPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Delay for the next re-check. `advance` is false while the network is suspended,
    /// in which case the current delay is reused without growing.
    pub fn next_delay(&mut self, advance: bool) -> Duration {
        if advance || self.failures == 0 {
            self.failures = self.failures.saturating_add(1);
        }
        self.policy.delay_for(self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Swap in a new policy (configuration change) keeping the failure count.
    pub fn set_policy(&mut self, policy: ReevaluationPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> ReevaluationPolicy {
        self.policy
    }
}
