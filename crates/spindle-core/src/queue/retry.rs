//! Retry policy: backoff before redelivering an explicitly failed message.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;

/// Backoff applied when a consumer fails a lease.
///
/// Lease expiry does not consult this policy: an expired message is already
/// `ack_timeout` late and becomes ready immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first redelivery.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,

    /// Fraction of the delay (0.0..=1.0) that may be randomly shaved off.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// No backoff at all: a failed message is ready again immediately.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before redelivering after the `attempts`-th delivery failed.
    ///
    /// `base_delay * multiplier^(attempts - 1)`, capped at `max_delay`, then
    /// reduced by up to `jitter` of itself.
    ///
    /// With base_delay=2s, multiplier=2.0 and no jitter:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if !capped.is_finite() || capped <= 0.0 {
            return Duration::ZERO;
        }

        let jitter = self.jitter.clamp(0.0, 1.0);
        let scaled = if jitter > 0.0 {
            let shave: f64 = rand::thread_rng().gen_range(0.0..=jitter);
            capped * (1.0 - shave)
        } else {
            capped
        };
        Duration::from_secs_f64(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(0, 2)]
    fn exponential_backoff(#[case] attempts: u32, #[case] expected_secs: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(attempts), Duration::from_secs(expected_secs));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_delay(30), Duration::from_secs(10));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_only_shortens() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let delay = policy.next_delay(2);
            assert!(delay <= Duration::from_secs(4));
            assert!(delay >= Duration::from_secs(2));
        }
    }

    #[test]
    fn immediate_policy_never_waits() {
        assert_eq!(RetryPolicy::immediate().next_delay(5), Duration::ZERO);
    }
}
