//! Balance sync barrier: after a side-effectful action (confirmed swap or LP
//! close) the expected wallet deltas are accumulated here, and decision-making
//! that depends on the wallet stalls until the observed deltas match within
//! tolerance. A deadline promotes a stuck barrier to a hard failure.

use rust_decimal::Decimal;

/// Relative tolerance: 1e-3 of the expected delta
const SYNC_REL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);
/// Absolute floor: 1e-8, covers zero-expected assets and dust
const SYNC_ABS_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSyncBarrier {
    pub baseline_base: Decimal,
    pub baseline_quote: Decimal,
    pub expected_delta_base: Decimal,
    pub expected_delta_quote: Decimal,
    pub created_ts: f64,
    pub deadline_ts: f64,
    pub last_attempt_ts: f64,
    pub attempts: u32,
    pub reason: String,
}

impl BalanceSyncBarrier {
    pub fn new(
        baseline_base: Decimal,
        baseline_quote: Decimal,
        reason: impl Into<String>,
        now: f64,
        timeout_sec: f64,
    ) -> Self {
        Self {
            baseline_base,
            baseline_quote,
            expected_delta_base: Decimal::ZERO,
            expected_delta_quote: Decimal::ZERO,
            created_ts: now,
            deadline_ts: now + timeout_sec,
            last_attempt_ts: 0.0,
            attempts: 0,
            reason: reason.into(),
        }
    }

    /// Accumulate further expected deltas and extend the deadline. Multiple
    /// side effects before the wallet catches up share one barrier.
    pub fn add_expected(&mut self, delta_base: Decimal, delta_quote: Decimal, now: f64, timeout_sec: f64) {
        self.expected_delta_base += delta_base;
        self.expected_delta_quote += delta_quote;
        self.deadline_ts = self.deadline_ts.max(now + timeout_sec);
    }

    /// Observed wallet matches baseline + expected deltas within tolerance
    /// on both assets. Partial movement in the right direction retains the
    /// barrier; only a full match clears it.
    pub fn is_synced(&self, wallet_base: Decimal, wallet_quote: Decimal) -> bool {
        let observed_base = wallet_base - self.baseline_base;
        let observed_quote = wallet_quote - self.baseline_quote;
        (observed_base - self.expected_delta_base).abs() <= sync_tolerance(self.expected_delta_base)
            && (observed_quote - self.expected_delta_quote).abs()
                <= sync_tolerance(self.expected_delta_quote)
    }

    pub fn timed_out(&self, now: f64) -> bool {
        now > self.deadline_ts
    }

    /// Whether a refresh attempt may fire now, per the escalating backoff
    pub fn refresh_due(&self, now: f64) -> bool {
        (now - self.last_attempt_ts) >= refresh_backoff(self.attempts)
    }

    pub fn record_attempt(&mut self, now: f64) {
        self.last_attempt_ts = now;
        self.attempts += 1;
    }
}

/// Per-asset tolerance: max(|expected| * 1e-3, 1e-8)
pub fn sync_tolerance(expected: Decimal) -> Decimal {
    (expected.abs() * SYNC_REL_TOLERANCE).max(SYNC_ABS_TOLERANCE)
}

/// Backoff between refresh retries: 3s, 6s, 12s, 24s->20s cap
pub fn refresh_backoff(attempts: u32) -> f64 {
    if attempts == 0 {
        return 3.0;
    }
    (3.0 * f64::from(2u32.pow(attempts.min(3)))).min(20.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn barrier() -> BalanceSyncBarrier {
        let mut b = BalanceSyncBarrier::new(dec!(10), dec!(1000), "swap_done", 100.0, 30.0);
        b.add_expected(dec!(5), dec!(-100), 100.0, 30.0);
        b
    }

    #[test]
    fn test_exact_match_clears() {
        let b = barrier();
        assert!(b.is_synced(dec!(15), dec!(900)));
    }

    #[test]
    fn test_within_tolerance_clears() {
        let b = barrier();
        // 1e-3 relative on expected 5 -> 0.005 slack on base
        assert!(b.is_synced(dec!(15.004), dec!(900.05)));
    }

    #[test]
    fn test_partial_progress_retains() {
        let b = barrier();
        // Moved in the right direction but short of expected
        assert!(!b.is_synced(dec!(12), dec!(950)));
    }

    #[test]
    fn test_no_movement_retains() {
        let b = barrier();
        assert!(!b.is_synced(dec!(10), dec!(1000)));
    }

    #[test]
    fn test_accumulated_expectations() {
        let mut b = barrier();
        b.add_expected(dec!(2), dec!(-40), 110.0, 30.0);
        assert_eq!(b.expected_delta_base, dec!(7));
        assert_eq!(b.expected_delta_quote, dec!(-140));
        assert!(b.is_synced(dec!(17), dec!(860)));
        assert_eq!(b.deadline_ts, 140.0);
    }

    #[test]
    fn test_deadline_only_extends() {
        let mut b = barrier();
        b.add_expected(dec!(1), dec!(0), 50.0, 30.0);
        // 50 + 30 < existing deadline 130 -> unchanged
        assert_eq!(b.deadline_ts, 130.0);
    }

    #[test]
    fn test_timeout() {
        let b = barrier();
        assert!(!b.timed_out(130.0));
        assert!(b.timed_out(130.1));
    }

    #[test]
    fn test_zero_expected_uses_absolute_floor() {
        let b = BalanceSyncBarrier::new(dec!(0), dec!(0), "close", 0.0, 30.0);
        // No expected deltas: any dust within 1e-8 matches
        assert!(b.is_synced(dec!(0.000000005), dec!(0)));
        assert!(!b.is_synced(dec!(0.001), dec!(0)));
    }

    #[test]
    fn test_refresh_backoff_escalates_and_caps() {
        assert_eq!(refresh_backoff(0), 3.0);
        assert_eq!(refresh_backoff(1), 6.0);
        assert_eq!(refresh_backoff(2), 12.0);
        assert_eq!(refresh_backoff(3), 20.0); // 24 capped
        assert_eq!(refresh_backoff(10), 20.0);
    }

    #[test]
    fn test_refresh_due_respects_backoff() {
        let mut b = barrier();
        assert!(b.refresh_due(103.0));
        b.record_attempt(103.0);
        assert!(!b.refresh_due(108.0)); // needs 6s after attempt 1
        assert!(b.refresh_due(109.0));
    }
}
