//! Exponential-backoff circuit breaking for the gateway client.
//!
//! Consecutive network failures arm a widening window (5 -> 10 -> 20 ->
//! 40 -> 60 s). While the window is armed every call fails immediately
//! with [`RpcError::Unavailable`] and no network I/O happens. A 503 with
//! `Retry-After: N` pins the window to `N + 1` seconds instead. The
//! first success resets everything.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::RpcError;

/// The failure ladder, in seconds. Failures beyond the last rung stay
/// at the ceiling.
const LADDER_SECS: [u64; 5] = [5, 10, 20, 40, 60];

/// Window armed after the n-th consecutive failure (1-based).
pub fn delay_for(consecutive_failures: u32) -> Duration {
    let idx = (consecutive_failures.max(1) as usize - 1).min(LADDER_SECS.len() - 1);
    Duration::from_secs(LADDER_SECS[idx])
}

#[derive(Debug, Default)]
struct BackoffState {
    consecutive_failures: u32,
    blocked_until: Option<Instant>,
}

/// Per-process circuit state, shared by every call site through the
/// client.
#[derive(Debug, Default)]
pub struct BackoffGate {
    state: Mutex<BackoffState>,
}

impl BackoffGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate a call: `Err(Unavailable)` while the window is armed.
    pub fn check(&self) -> Result<(), RpcError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(until) = state.blocked_until {
            if Instant::now() < until {
                return Err(RpcError::Unavailable);
            }
        }
        Ok(())
    }

    /// Record a transport-level failure. `retry_after` pins the window
    /// (the `Retry-After: N` path); otherwise the ladder applies.
    pub fn record_failure(&self, retry_after: Option<Duration>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures += 1;
        let delay = retry_after.unwrap_or_else(|| delay_for(state.consecutive_failures));
        state.blocked_until = Some(Instant::now() + delay);
        tracing::warn!(
            consecutive_failures = state.consecutive_failures,
            delay_secs = delay.as_secs(),
            "gateway call failed, arming backoff window"
        );
    }

    /// Reset on the first successful response.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.consecutive_failures > 0 {
            tracing::info!(
                recovered_after = state.consecutive_failures,
                "gateway recovered, resetting backoff"
            );
        }
        state.consecutive_failures = 0;
        state.blocked_until = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .consecutive_failures
    }

    /// Whether the window is currently armed.
    pub fn is_open(&self) -> bool {
        self.check().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_widens_then_caps() {
        assert_eq!(delay_for(1), Duration::from_secs(5));
        assert_eq!(delay_for(2), Duration::from_secs(10));
        assert_eq!(delay_for(3), Duration::from_secs(20));
        assert_eq!(delay_for(4), Duration::from_secs(40));
        assert_eq!(delay_for(5), Duration::from_secs(60));
        assert_eq!(delay_for(99), Duration::from_secs(60));
    }

    #[test]
    fn three_failures_arm_a_twenty_second_window() {
        let gate = BackoffGate::new();
        for _ in 0..3 {
            assert!(gate.check().is_ok() || gate.is_open());
            gate.record_failure(None);
        }
        assert_eq!(gate.consecutive_failures(), 3);
        assert!(gate.is_open());
        assert!(matches!(gate.check(), Err(RpcError::Unavailable)));
    }

    #[test]
    fn success_resets_the_counter() {
        let gate = BackoffGate::new();
        gate.record_failure(None);
        gate.record_failure(None);
        assert!(gate.is_open());

        gate.record_success();
        assert_eq!(gate.consecutive_failures(), 0);
        assert!(gate.check().is_ok());
    }

    #[test]
    fn retry_after_overrides_the_ladder() {
        let gate = BackoffGate::new();
        gate.record_failure(Some(Duration::from_secs(120)));
        assert!(gate.is_open());

        // A zero-length override leaves the gate effectively closed.
        let gate = BackoffGate::new();
        gate.record_failure(Some(Duration::ZERO));
        assert!(!gate.is_open());
    }

    #[test]
    fn fresh_gate_is_closed() {
        let gate = BackoffGate::new();
        assert!(!gate.is_open());
        assert!(gate.check().is_ok());
    }
}
