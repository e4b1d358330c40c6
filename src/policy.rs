//! Venue policy: how ranges are built and deposit ratios computed per pool
//! type. Uniswap v3 aligns ranges to the tick grid and clamps the ratio price
//! by ticks; Meteora DLMM uses raw geometric bounds and clamps by a fraction
//! of the range. The venue set is closed, so this is an enum, not a trait.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde_json::json;

use crate::adapter::PoolDomainAdapter;
use crate::config::{ControllerConfig, PoolVenue};
use crate::math::{RangeCalculator, RangePlan, V3Math};

/// v3 tick base: price = 1.0001^tick
static TICK_BASE: Lazy<Decimal> = Lazy::new(|| Decimal::new(10001, 4));

#[derive(Debug, Clone)]
pub enum PoolPolicy {
    UniswapV3(UniswapV3Policy),
    Meteora(MeteoraPolicy),
}

#[derive(Debug, Clone)]
pub struct UniswapV3Policy {
    width_ratio: Decimal,
    clamp_tick_multiplier: i64,
    domain: PoolDomainAdapter,
    /// Resolved from pool info by the external feed; ranges wait on it
    tick_spacing: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MeteoraPolicy {
    width_ratio: Decimal,
    edge_buffer: Decimal,
    strategy_type: Option<i64>,
}

impl PoolPolicy {
    pub fn from_config(config: &ControllerConfig, domain: PoolDomainAdapter) -> Self {
        match config.venue {
            PoolVenue::UniswapV3 => PoolPolicy::UniswapV3(UniswapV3Policy {
                width_ratio: config.position_width_pct,
                clamp_tick_multiplier: config.ratio_clamp_tick_multiplier.max(1),
                domain,
                tick_spacing: None,
            }),
            PoolVenue::Meteora => PoolPolicy::Meteora(MeteoraPolicy {
                width_ratio: config.position_width_pct,
                edge_buffer: config.ratio_edge_buffer_pct.max(Decimal::ZERO),
                strategy_type: config.meteora_strategy_type,
            }),
        }
    }

    /// Feed resolved pool metadata (v3 tick spacing / DLMM bin step)
    pub fn set_tick_spacing(&mut self, tick_spacing: i64) {
        if let PoolPolicy::UniswapV3(policy) = self {
            if tick_spacing > 0 {
                policy.tick_spacing = Some(tick_spacing);
            }
        }
    }

    /// Whether the policy can produce ranges yet
    pub fn is_ready(&self) -> bool {
        match self {
            PoolPolicy::UniswapV3(policy) => policy.tick_spacing.is_some(),
            PoolPolicy::Meteora(_) => true,
        }
    }

    /// Strategy-oriented range plan around `center_price`
    pub fn range_plan(&self, center_price: Decimal) -> Option<RangePlan> {
        match self {
            PoolPolicy::UniswapV3(policy) => policy.range_plan(center_price),
            PoolPolicy::Meteora(policy) => {
                RangeCalculator::geometric_plan(center_price, policy.width_ratio)
            }
        }
    }

    /// Deposit ratio at a possibly clamped price. The clamp keeps the ratio
    /// finite when spot sits on a range edge.
    pub fn quote_per_base_ratio(
        &self,
        price: Decimal,
        lower: Decimal,
        upper: Decimal,
    ) -> Option<Decimal> {
        match self {
            PoolPolicy::UniswapV3(policy) => policy.quote_per_base_ratio(price, lower, upper),
            PoolPolicy::Meteora(policy) => policy.quote_per_base_ratio(price, lower, upper),
        }
    }

    /// Venue-specific extras forwarded in the LP executor config
    pub fn extra_lp_params(&self) -> Option<serde_json::Value> {
        match self {
            PoolPolicy::UniswapV3(_) => None,
            PoolPolicy::Meteora(policy) => policy
                .strategy_type
                .map(|strategy_type| json!({ "strategyType": strategy_type })),
        }
    }
}

impl UniswapV3Policy {
    fn range_plan(&self, center_price: Decimal) -> Option<RangePlan> {
        let base_plan = RangeCalculator::geometric_plan(center_price, self.width_ratio)?;
        let tick_spacing = self.tick_spacing?;
        let (pool_lower, pool_upper) = self
            .domain
            .strategy_bounds_to_pool(base_plan.lower, base_plan.upper);
        let (aligned_lower, aligned_upper) =
            RangeCalculator::align_bounds_to_ticks(pool_lower, pool_upper, tick_spacing, *TICK_BASE)?;
        let (lower, upper) = self.domain.pool_bounds_to_strategy(aligned_lower, aligned_upper);
        if lower >= upper {
            return None;
        }
        Some(RangePlan {
            center_price,
            lower,
            upper,
        })
    }

    fn quote_per_base_ratio(&self, price: Decimal, lower: Decimal, upper: Decimal) -> Option<Decimal> {
        let tick_spacing = self.tick_spacing?;
        if price <= Decimal::ZERO || lower <= Decimal::ZERO || upper <= Decimal::ZERO || lower >= upper
        {
            return None;
        }
        let clamp_ticks = tick_spacing * self.clamp_tick_multiplier;
        let pool_price = self.domain.strategy_price_to_pool(price);
        let (pool_lower, pool_upper) = self.domain.strategy_bounds_to_pool(lower, upper);
        let clamped_pool_price = RangeCalculator::clamp_price_by_ticks(
            pool_price,
            pool_lower,
            pool_upper,
            *TICK_BASE,
            clamp_ticks,
        )?;
        let clamped_price = self.domain.pool_price_to_strategy(clamped_pool_price);
        V3Math::quote_per_base_ratio(clamped_price, lower, upper)
    }
}

impl MeteoraPolicy {
    fn quote_per_base_ratio(&self, price: Decimal, lower: Decimal, upper: Decimal) -> Option<Decimal> {
        let mut price = price;
        if self.edge_buffer > Decimal::ZERO {
            let range_size = upper - lower;
            let clamp_offset = range_size * self.edge_buffer;
            let clamp_lower = lower + clamp_offset;
            let clamp_upper = upper - clamp_offset;
            if clamp_lower >= clamp_upper {
                return None;
            }
            price = price.clamp(clamp_lower, clamp_upper);
        }
        V3Math::quote_per_base_ratio(price, lower, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::config::PoolVenue;
    use rust_decimal_macros::dec;

    fn v3_policy(tick_spacing: Option<i64>) -> PoolPolicy {
        let config = test_config();
        let domain = PoolDomainAdapter::from_pairs("SOL-USDC", None);
        let mut policy = PoolPolicy::from_config(&config, domain);
        if let Some(spacing) = tick_spacing {
            policy.set_tick_spacing(spacing);
        }
        policy
    }

    fn meteora_policy() -> PoolPolicy {
        let mut config = test_config();
        config.venue = PoolVenue::Meteora;
        config.meteora_strategy_type = Some(1);
        let domain = PoolDomainAdapter::from_pairs("SOL-USDC", None);
        PoolPolicy::from_config(&config, domain)
    }

    #[test]
    fn test_v3_not_ready_without_tick_spacing() {
        let policy = v3_policy(None);
        assert!(!policy.is_ready());
        assert!(policy.range_plan(dec!(20)).is_none());
        assert!(policy.quote_per_base_ratio(dec!(20), dec!(18), dec!(22)).is_none());
    }

    #[test]
    fn test_v3_range_plan_aligned() {
        let mut policy = v3_policy(None);
        policy.set_tick_spacing(60);
        assert!(policy.is_ready());
        let plan = policy.range_plan(dec!(20)).unwrap();
        assert!(plan.lower < dec!(20) && dec!(20) < plan.upper);
        // Alignment widens, so the aligned range covers the geometric one
        let (geo_lower, geo_upper) =
            RangeCalculator::geometric_bounds(dec!(20), dec!(0.12)).unwrap();
        assert!(plan.lower <= geo_lower * dec!(1.0001));
        assert!(plan.upper >= geo_upper / dec!(1.0001));
    }

    #[test]
    fn test_v3_ratio_at_center() {
        let policy = v3_policy(Some(10));
        let plan = policy.range_plan(dec!(20)).unwrap();
        let ratio = policy
            .quote_per_base_ratio(dec!(20), plan.lower, plan.upper)
            .unwrap();
        assert!(ratio > Decimal::ZERO);
    }

    #[test]
    fn test_v3_ratio_clamps_edge_price() {
        let policy = v3_policy(Some(10));
        let plan = policy.range_plan(dec!(20)).unwrap();
        // Spot pinned on the lower bound would make the raw ratio undefined;
        // the tick clamp pulls it inside
        let ratio = policy.quote_per_base_ratio(plan.lower, plan.lower, plan.upper);
        assert!(ratio.is_some());
    }

    #[test]
    fn test_v3_extra_params_absent() {
        assert!(v3_policy(Some(10)).extra_lp_params().is_none());
    }

    #[test]
    fn test_meteora_geometric_plan() {
        let policy = meteora_policy();
        assert!(policy.is_ready());
        let plan = policy.range_plan(dec!(20)).unwrap();
        let product = plan.lower * plan.upper;
        assert!((product - dec!(400)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_meteora_edge_buffer_clamps() {
        let policy = meteora_policy();
        // Price outside the range clamps to the buffered interior
        let ratio = policy.quote_per_base_ratio(dec!(30), dec!(18), dec!(22));
        assert!(ratio.is_some());
        let ratio_low = policy.quote_per_base_ratio(dec!(1), dec!(18), dec!(22));
        assert!(ratio_low.is_some());
    }

    #[test]
    fn test_meteora_extra_params() {
        let params = meteora_policy().extra_lp_params().unwrap();
        assert_eq!(params["strategyType"], 1);
    }
}
