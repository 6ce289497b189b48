use std::time::Duration;

/// Reconnect tuning (§4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

/// `min(maxDelay, baseDelay * 2^attempt + jitter)` (§4.2).
///
/// `jitter` is passed in rather than sampled here so the formula stays a
/// pure, testable function; callers draw it uniformly from `[0, 1000)` ms.
pub fn next_delay(policy: &ReconnectPolicy, attempt: u32, jitter: Duration) -> Duration {
    let scaled = policy
        .base_delay
        .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .unwrap_or(policy.max_delay);
    (scaled + jitter).min(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        };
        for attempt in 0..8 {
            let delay = next_delay(&policy, attempt, Duration::ZERO);
            let lower = policy.base_delay * 2u32.pow(attempt);
            assert!(delay >= lower.min(policy.max_delay));
            assert!(delay <= policy.max_delay);
        }
    }

    #[test]
    fn jitter_is_additive_within_bound() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100_000),
        };
        let base = next_delay(&policy, 2, Duration::ZERO);
        let jittered = next_delay(&policy, 2, Duration::from_millis(999));
        assert_eq!(jittered - base, Duration::from_millis(999));
    }
}
