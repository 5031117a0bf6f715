//! Retry policy: a pure decision function over (attempt, failure kind).
//!
//! The policy never sleeps; it returns a `RetryDecision` and the
//! orchestrator owns the actual delay. This keeps backoff timing
//! testable without real waits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ErrorKind;

/// Retry configuration for failed steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Ceiling on the backoff delay, in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// Outcome of a retry decision. Ephemeral, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn give_up() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Decide whether attempt `attempt` (1-indexed) should be retried.
    ///
    /// Terminal failures are never retried. Unknown failures are treated
    /// as Transient here; the orchestrator intercepts Unknown outcomes on
    /// non-idempotent steps before ever consulting the policy.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        match kind {
            ErrorKind::Terminal => RetryDecision::give_up(),
            ErrorKind::Transient | ErrorKind::Unknown => {
                if attempt < self.max_attempts {
                    RetryDecision {
                        should_retry: true,
                        delay: self.delay_for_attempt(attempt),
                    }
                } else {
                    RetryDecision::give_up()
                }
            }
        }
    }

    /// Delay after a failed attempt (1-indexed): `base * 2^(attempt-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));

        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}
