//! Rebalance engine: per-tick evaluation of the active LP against price,
//! hysteresis, dwell time, cooldown, the hourly rate limit and the cost
//! filter. Emits a signal; the FSM owns the resulting stop/reopen sequence.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::controller::context::ControllerContext;
use crate::cost_filter::CostFilter;
use crate::types::{LPView, Snapshot};

/// Sliding window for the hourly rate limit
const RATE_WINDOW_SEC: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceSignal {
    pub should_rebalance: bool,
    pub reason: &'static str,
}

impl RebalanceSignal {
    fn hold(reason: &'static str) -> Self {
        Self {
            should_rebalance: false,
            reason,
        }
    }
}

pub struct RebalanceEngine {
    config: ControllerConfig,
}

impl RebalanceEngine {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    /// Evaluate one active LP. Mutates the out-of-range timer and garbage
    /// collects the rate-limit window; everything else is read-only.
    pub fn evaluate(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ControllerContext,
        lp_view: &LPView,
    ) -> RebalanceSignal {
        if !self.config.rebalance_enabled {
            return RebalanceSignal::hold("rebalance_disabled");
        }

        let price = match snapshot
            .price()
            .or(lp_view.current_price.filter(|p| *p > Decimal::ZERO))
        {
            Some(p) => p,
            None => return RebalanceSignal::hold("price_unavailable"),
        };

        let (lower, upper) = match (lp_view.lower_price, lp_view.upper_price) {
            (Some(lower), Some(upper)) if lower > Decimal::ZERO && upper > Decimal::ZERO => {
                (lower, upper)
            }
            _ => return RebalanceSignal::hold("range_unavailable"),
        };

        if lower <= price && price <= upper {
            ctx.out_of_range_since = None;
            return RebalanceSignal::hold("in_range");
        }

        let deviation_pct = if price < lower {
            (lower - price) / lower * Decimal::ONE_HUNDRED
        } else {
            (price - upper) / upper * Decimal::ONE_HUNDRED
        };
        let hysteresis_points = self.config.hysteresis_pct.max(Decimal::ZERO) * Decimal::ONE_HUNDRED;
        if deviation_pct < hysteresis_points {
            return RebalanceSignal::hold("hysteresis");
        }

        let out_of_range_since = match ctx.out_of_range_since {
            Some(since) => since,
            None => {
                ctx.out_of_range_since = Some(snapshot.now);
                return RebalanceSignal::hold("monitoring");
            }
        };

        if (snapshot.now - out_of_range_since) < f64::from(self.config.rebalance_seconds) {
            return RebalanceSignal::hold("waiting");
        }
        if ctx.last_rebalance_ts > 0.0
            && (snapshot.now - ctx.last_rebalance_ts) < f64::from(self.config.cooldown_seconds)
        {
            return RebalanceSignal::hold("cooldown");
        }
        if !self.can_rebalance_now(snapshot.now, ctx) {
            return RebalanceSignal::hold("rate_limit");
        }

        let fee_rate_ewma = ctx
            .fee_estimators
            .get(&lp_view.executor_id)
            .and_then(|state| state.fee_rate_ewma);
        let mut allow = CostFilter::allow_rebalance(
            self.config.cost_filter_enabled,
            lp_view.value_with_fees(price),
            fee_rate_ewma,
            self.config.cost_filter_fee_rate_bootstrap_quote_per_hour,
            self.config.auto_swap_enabled,
            self.config.swap_slippage_pct.max(Decimal::ZERO) * Decimal::ONE_HUNDRED,
            self.config.cost_filter_fixed_cost_quote,
            self.config.cost_filter_max_payback_sec,
        );
        if !allow
            && CostFilter::should_force_rebalance(
                snapshot.now,
                out_of_range_since,
                self.config.rebalance_seconds,
            )
        {
            debug!("cost filter overridden: out of range too long");
            allow = true;
        }
        if !allow {
            return RebalanceSignal::hold("cost_filter");
        }

        RebalanceSignal {
            should_rebalance: true,
            reason: "out_of_range_rebalance",
        }
    }

    /// Record an executed rebalance for cooldown and rate limiting
    pub fn record_rebalance(&self, now: f64, ctx: &mut ControllerContext) {
        ctx.push_rebalance_ts(now);
        ctx.last_rebalance_ts = now;
    }

    fn can_rebalance_now(&self, now: f64, ctx: &mut ControllerContext) -> bool {
        if self.config.max_rebalances_per_hour == 0 {
            return true;
        }
        while ctx
            .rebalance_timestamps
            .front()
            .is_some_and(|ts| now - ts > RATE_WINDOW_SEC)
        {
            ctx.rebalance_timestamps.pop_front();
        }
        ctx.rebalance_timestamps.len() < self.config.max_rebalances_per_hour as usize
    }
}
