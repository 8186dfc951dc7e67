//! Push-channel lifecycle: connection states and the reconnect backoff
//! policy. The supervisor loop itself lives on `RoomSession`, which owns the
//! generation counter that invalidates callbacks after teardown.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting,
}

/// Exponential reconnect delay: `min(cap, base * 2^attempt)`, attempt
/// incremented each failed cycle. Retries are unbounded while the session
/// stays open.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|delay| delay.min(self.cap))
            .unwrap_or(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|attempt| policy.delay(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn backoff_is_non_decreasing() {
        let policy = BackoffPolicy::default();
        let mut last = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay(attempt);
            assert!(delay >= last);
            assert!(delay <= policy.cap);
            last = delay;
        }
    }
}
