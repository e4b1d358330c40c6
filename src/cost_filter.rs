//! Rebalance cost filter: estimates the fee accrual rate of a position with
//! an EWMA and gates rebalances on whether post-range fees can pay back the
//! swap + fixed costs within a bounded horizon. Positions stuck out of range
//! long enough get a force override so the filter can never pin a dead range.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tracing::debug;

/// Per-position fee estimator state, keyed by position address in the
/// controller context. A new address resets the baseline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeEstimatorState {
    pub fee_rate_ewma: Option<Decimal>,
    pub last_fee_value: Option<Decimal>,
    pub last_fee_ts: Option<f64>,
    pub last_position_address: Option<String>,
}

pub struct CostFilter;

impl CostFilter {
    /// EWMA smoothing factor
    const FEE_EWMA_ALPHA: Decimal = Decimal::from_parts(1, 0, 0, false, 1); // 0.1
    /// Minimum sample spacing; shorter gaps are noise
    const FEE_SAMPLE_MIN_SECONDS: f64 = 10.0;

    /// Horizon over which expected fees are projected (1h)
    const IN_RANGE_TIME_SEC: u32 = 3600;
    /// Fraction of position value assumed to move through the inventory swap
    const SWAP_NOTIONAL_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 1); // 0.5
    /// Router fee buffer added on top of slippage, in percent points
    const SWAP_FEE_BUFFER_PCT: Decimal = Decimal::from_parts(3, 0, 0, false, 1); // 0.3
    /// Denominator floor for the payback computation
    const FEE_RATE_FLOOR: Decimal = Decimal::from_parts(1, 0, 0, false, 9); // 1e-9
    /// Expected fees must cover costs at least twice over
    const SAFETY_FACTOR: Decimal = Decimal::TWO;

    const FORCE_REBALANCE_MULTIPLIER: u32 = 10;
    const FORCE_REBALANCE_MIN_SEC: u32 = 600;

    /// Fold a new pending-fee observation into the per-position EWMA.
    /// First observation (or a position change) seeds the baseline; negative
    /// deltas (a fee claim) reset the baseline without updating the EWMA.
    pub fn update_fee_rate_ewma(
        now: f64,
        position_address: &str,
        pending_fee_quote: Decimal,
        state: &mut FeeEstimatorState,
    ) {
        if position_address.is_empty() {
            return;
        }

        if state.last_position_address.as_deref() != Some(position_address) {
            state.last_position_address = Some(position_address.to_string());
            state.last_fee_value = None;
            state.last_fee_ts = None;
            state.fee_rate_ewma = None;
            return;
        }

        let (last_ts, last_value) = match (state.last_fee_ts, state.last_fee_value) {
            (Some(ts), Some(value)) => (ts, value),
            _ => {
                state.last_fee_ts = Some(now);
                state.last_fee_value = Some(pending_fee_quote);
                return;
            }
        };

        let dt = now - last_ts;
        if dt <= 0.0 || dt < Self::FEE_SAMPLE_MIN_SECONDS {
            return;
        }

        let delta = pending_fee_quote - last_value;
        if delta < Decimal::ZERO {
            state.last_fee_ts = Some(now);
            state.last_fee_value = Some(pending_fee_quote);
            return;
        }

        let dt_dec = match Decimal::from_f64(dt) {
            Some(v) if v > Decimal::ZERO => v,
            _ => return,
        };
        let fee_rate = delta / dt_dec;
        state.fee_rate_ewma = Some(match state.fee_rate_ewma {
            None => fee_rate,
            Some(ewma) => {
                ewma * (Decimal::ONE - Self::FEE_EWMA_ALPHA) + fee_rate * Self::FEE_EWMA_ALPHA
            }
        });
        state.last_fee_ts = Some(now);
        state.last_fee_value = Some(pending_fee_quote);
    }

    /// Does the expected fee income of a freshly centered range justify the
    /// cost of getting there? `swap_slippage_pct` is in percent points.
    #[allow(clippy::too_many_arguments)]
    pub fn allow_rebalance(
        enabled: bool,
        position_value: Decimal,
        fee_rate_ewma: Option<Decimal>,
        fee_rate_bootstrap_quote_per_hour: Decimal,
        auto_swap_enabled: bool,
        swap_slippage_pct: Decimal,
        fixed_cost_quote: Decimal,
        max_payback_sec: u32,
    ) -> bool {
        if !enabled {
            return true;
        }

        let fee_rate = match fee_rate_ewma {
            Some(rate) if rate > Decimal::ZERO => rate,
            _ => fee_rate_bootstrap_quote_per_hour / Decimal::from(Self::IN_RANGE_TIME_SEC),
        };

        let expected_fees = fee_rate * Decimal::from(Self::IN_RANGE_TIME_SEC);
        let fixed_cost = fixed_cost_quote.max(Decimal::ZERO);
        let swap_notional = if auto_swap_enabled {
            position_value * Self::SWAP_NOTIONAL_PCT
        } else {
            Decimal::ZERO
        };
        let swap_fee_pct = (swap_slippage_pct + Self::SWAP_FEE_BUFFER_PCT).max(Decimal::ZERO);
        let swap_cost = swap_notional * (swap_fee_pct / Decimal::ONE_HUNDRED);
        let cost = fixed_cost + swap_cost;

        if cost <= Decimal::ZERO {
            return true;
        }

        if expected_fees < cost * Self::SAFETY_FACTOR {
            debug!(
                "cost filter reject: expected_fees={} < 2x cost={}",
                expected_fees, cost
            );
            return false;
        }

        let payback_sec = cost / fee_rate.max(Self::FEE_RATE_FLOOR);
        payback_sec <= Decimal::from(max_payback_sec)
    }

    /// Out of range long enough that the cost filter no longer applies
    pub fn should_force_rebalance(now: f64, out_of_range_since: f64, rebalance_seconds: u32) -> bool {
        if rebalance_seconds == 0 {
            return false;
        }
        let threshold = (rebalance_seconds * Self::FORCE_REBALANCE_MULTIPLIER)
            .max(Self::FORCE_REBALANCE_MIN_SEC);
        (now - out_of_range_since) >= threshold as f64
    }
}
