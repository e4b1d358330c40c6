//! Action factory: turns proposals and swap intents into executor create
//! configs. Amounts/bounds cross into pool orientation here; slippage is
//! converted from ratio to the percent points the router executor expects.
//! Executor ids derive from the snapshot clock, so rebuilding the same tick
//! yields the same ids.

use rust_decimal::Decimal;
use tracing::warn;

use crate::adapter::PoolDomainAdapter;
use crate::config::ControllerConfig;
use crate::planner::OpenProposal;
use crate::policy::PoolPolicy;
use crate::types::{Action, LpExecutorConfig, SwapExecutorConfig, SwapPurpose, TradeSide};

/// Router executors reject slippage above this many percent points
const MAX_SLIPPAGE_POINTS: Decimal = Decimal::TEN;

pub struct ActionFactory {
    controller_id: String,
    connector_name: String,
    router_connector: String,
    trading_pair: String,
    pool_address: String,
    budget_key: String,
    swap_slippage_pct: Decimal,
    swap_safety_buffer_pct: Decimal,
    domain: PoolDomainAdapter,
}

impl ActionFactory {
    pub fn new(config: &ControllerConfig, domain: PoolDomainAdapter) -> Self {
        Self {
            controller_id: config.id.clone(),
            connector_name: config.connector_name.clone(),
            router_connector: config.router_connector.clone(),
            trading_pair: config.trading_pair.clone(),
            pool_address: config.pool_address.clone(),
            budget_key: config.budget_key().to_string(),
            swap_slippage_pct: config.swap_slippage_pct.max(Decimal::ZERO),
            swap_safety_buffer_pct: config.swap_safety_buffer_pct.max(Decimal::ZERO),
            domain,
        }
    }

    /// Router slippage in percent points (ratio x 100)
    pub fn swap_slippage_points(&self) -> Decimal {
        self.swap_slippage_pct * Decimal::ONE_HUNDRED
    }

    /// Build the LP open action for a proposal. Both sides must be positive;
    /// one-sided proposals go through the inventory swap first.
    pub fn build_open_lp_action(
        &self,
        policy: &PoolPolicy,
        proposal: &OpenProposal,
        now: f64,
    ) -> Option<Action> {
        if proposal.open_base <= Decimal::ZERO || proposal.open_quote <= Decimal::ZERO {
            return None;
        }
        let (pool_base_amt, pool_quote_amt) = self
            .domain
            .strategy_amounts_to_pool(proposal.open_base, proposal.open_quote);
        let (pool_lower, pool_upper) = self
            .domain
            .strategy_bounds_to_pool(proposal.lower, proposal.upper);

        Some(Action::CreateLp(LpExecutorConfig {
            id: self.executor_id("lp", now),
            timestamp: now,
            connector_name: self.connector_name.clone(),
            pool_address: self.pool_address.clone(),
            trading_pair: self.domain.pool_trading_pair.clone(),
            base_token: self.domain.pool_base_token.clone(),
            quote_token: self.domain.pool_quote_token.clone(),
            lower_price: pool_lower,
            upper_price: pool_upper,
            base_amount: pool_base_amt,
            quote_amount: pool_quote_amt,
            side: side_from_amounts(pool_base_amt, pool_quote_amt),
            keep_position: false,
            budget_key: self.budget_key.clone(),
            budget_reservation_id: None,
            extra_params: policy.extra_lp_params(),
        }))
    }

    /// Build a router swap action. `apply_buffer` shaves SELL sizes by the
    /// safety buffer so balance rounding cannot overdraw the wallet.
    pub fn build_swap_action(
        &self,
        purpose: SwapPurpose,
        now: f64,
        side: TradeSide,
        amount: Decimal,
        amount_in_is_quote: bool,
        apply_buffer: bool,
    ) -> Option<Action> {
        if amount <= Decimal::ZERO {
            return None;
        }
        let amount = if apply_buffer {
            self.apply_swap_buffer(amount)
        } else {
            amount
        };
        if amount <= Decimal::ZERO {
            return None;
        }
        let slippage_points = self.swap_slippage_points();
        if slippage_points <= Decimal::ZERO || slippage_points > MAX_SLIPPAGE_POINTS {
            warn!(
                "swap rejected: slippage {} points outside (0, {}]",
                slippage_points, MAX_SLIPPAGE_POINTS
            );
            return None;
        }
        Some(Action::CreateSwap(SwapExecutorConfig {
            id: self.executor_id("swap", now),
            timestamp: now,
            connector_name: self.router_connector.clone(),
            trading_pair: self.trading_pair.clone(),
            side,
            amount,
            amount_in_is_quote,
            slippage_pct: slippage_points,
            pool_address: (!self.pool_address.is_empty()).then(|| self.pool_address.clone()),
            level_id: purpose.level_id().to_string(),
            budget_key: self.budget_key.clone(),
        }))
    }

    /// Inventory swap toward a signed base delta: positive buys base with
    /// quote (amount denominated in quote), negative sells base (buffered).
    pub fn build_swap_action_for_delta(
        &self,
        purpose: SwapPurpose,
        now: f64,
        current_price: Option<Decimal>,
        delta_base: Decimal,
    ) -> Option<Action> {
        let price = current_price.filter(|p| *p > Decimal::ZERO)?;
        if delta_base > Decimal::ZERO {
            self.build_swap_action(
                purpose,
                now,
                TradeSide::Buy,
                (delta_base * price).abs(),
                true,
                false,
            )
        } else if delta_base < Decimal::ZERO {
            self.build_swap_action(purpose, now, TradeSide::Sell, delta_base.abs(), false, true)
        } else {
            None
        }
    }

    fn apply_swap_buffer(&self, amount: Decimal) -> Decimal {
        if self.swap_safety_buffer_pct <= Decimal::ZERO {
            return amount;
        }
        if self.swap_safety_buffer_pct >= Decimal::ONE {
            return Decimal::ZERO;
        }
        amount * (Decimal::ONE - self.swap_safety_buffer_pct)
    }

    fn executor_id(&self, kind: &str, now: f64) -> String {
        format!("{}-{}-{}", kind, self.controller_id, (now * 1000.0) as u64)
    }
}

fn side_from_amounts(base_amt: Decimal, quote_amt: Decimal) -> u8 {
    if base_amt > Decimal::ZERO && quote_amt > Decimal::ZERO {
        0
    } else if quote_amt > Decimal::ZERO {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use rust_decimal_macros::dec;

    fn factory() -> ActionFactory {
        let config = test_config();
        let domain = PoolDomainAdapter::from_pairs("SOL-USDC", None);
        ActionFactory::new(&config, domain)
    }

    fn inverted_factory() -> ActionFactory {
        let mut config = test_config();
        config.pool_trading_pair = Some("USDC-SOL".to_string());
        let domain = PoolDomainAdapter::from_pairs("SOL-USDC", Some("USDC-SOL"));
        ActionFactory::new(&config, domain)
    }

    fn proposal() -> OpenProposal {
        OpenProposal {
            lower: dec!(18),
            upper: dec!(22),
            target_base: dec!(5),
            target_quote: dec!(100),
            delta_base: dec!(0),
            delta_quote_value: dec!(0),
            open_base: dec!(5),
            open_quote: dec!(100),
            min_swap_value_quote: dec!(1),
        }
    }

    fn policy() -> PoolPolicy {
        let config = test_config();
        let domain = PoolDomainAdapter::from_pairs("SOL-USDC", None);
        PoolPolicy::from_config(&config, domain)
    }

    #[test]
    fn test_open_lp_action_fields() {
        let action = factory().build_open_lp_action(&policy(), &proposal(), 1000.5).unwrap();
        let Action::CreateLp(config) = action else {
            panic!("expected CreateLp");
        };
        assert_eq!(config.id, "lp-clmm-test-1000500");
        assert_eq!(config.lower_price, dec!(18));
        assert_eq!(config.upper_price, dec!(22));
        assert_eq!(config.base_amount, dec!(5));
        assert_eq!(config.quote_amount, dec!(100));
        assert_eq!(config.side, 0);
        assert!(!config.keep_position);
        assert_eq!(config.budget_key, "clmm-test");
    }

    #[test]
    fn test_open_lp_action_inverted_pool() {
        let action = inverted_factory()
            .build_open_lp_action(&policy(), &proposal(), 0.0)
            .unwrap();
        let Action::CreateLp(config) = action else {
            panic!("expected CreateLp");
        };
        // Amounts swap, bounds invert: [1/22, 1/18]
        assert_eq!(config.base_amount, dec!(100));
        assert_eq!(config.quote_amount, dec!(5));
        assert!(config.lower_price < config.upper_price);
        assert!((config.lower_price - dec!(1) / dec!(22)).abs() < dec!(0.0000001));
        assert_eq!(config.trading_pair, "USDC-SOL");
        assert_eq!(config.base_token, "USDC");
    }

    #[test]
    fn test_open_lp_rejects_one_sided() {
        let mut one_sided = proposal();
        one_sided.open_quote = dec!(0);
        assert!(factory().build_open_lp_action(&policy(), &one_sided, 0.0).is_none());
    }

    #[test]
    fn test_swap_action_slippage_points() {
        let action = factory()
            .build_swap_action(SwapPurpose::Inventory, 10.0, TradeSide::Buy, dec!(50), true, false)
            .unwrap();
        let Action::CreateSwap(config) = action else {
            panic!("expected CreateSwap");
        };
        // config ratio 0.01 -> 1 percent point
        assert_eq!(config.slippage_pct, dec!(1.00));
        assert_eq!(config.level_id, "inventory");
        assert!(config.amount_in_is_quote);
    }

    #[test]
    fn test_swap_action_rejects_bad_slippage() {
        let mut config = test_config();
        config.swap_slippage_pct = dec!(0.2); // 20 points, above the router cap
        let domain = PoolDomainAdapter::from_pairs("SOL-USDC", None);
        let factory = ActionFactory::new(&config, domain);
        assert!(factory
            .build_swap_action(SwapPurpose::Inventory, 0.0, TradeSide::Buy, dec!(50), true, false)
            .is_none());

        let mut config = test_config();
        config.swap_slippage_pct = dec!(0);
        let domain = PoolDomainAdapter::from_pairs("SOL-USDC", None);
        let factory = ActionFactory::new(&config, domain);
        assert!(factory
            .build_swap_action(SwapPurpose::Inventory, 0.0, TradeSide::Buy, dec!(50), true, false)
            .is_none());
    }

    #[test]
    fn test_sell_applies_safety_buffer() {
        let action = factory()
            .build_swap_action_for_delta(SwapPurpose::Inventory, 0.0, Some(dec!(20)), dec!(-10))
            .unwrap();
        let Action::CreateSwap(config) = action else {
            panic!("expected CreateSwap");
        };
        assert_eq!(config.side, TradeSide::Sell);
        // 2% buffer shaves 10 -> 9.8
        assert_eq!(config.amount, dec!(9.80));
        assert!(!config.amount_in_is_quote);
    }

    #[test]
    fn test_buy_denominated_in_quote_without_buffer() {
        let action = factory()
            .build_swap_action_for_delta(SwapPurpose::Inventory, 0.0, Some(dec!(20)), dec!(3))
            .unwrap();
        let Action::CreateSwap(config) = action else {
            panic!("expected CreateSwap");
        };
        assert_eq!(config.side, TradeSide::Buy);
        assert_eq!(config.amount, dec!(60));
        assert!(config.amount_in_is_quote);
    }

    #[test]
    fn test_zero_delta_yields_no_action() {
        assert!(factory()
            .build_swap_action_for_delta(SwapPurpose::Inventory, 0.0, Some(dec!(20)), dec!(0))
            .is_none());
        assert!(factory()
            .build_swap_action_for_delta(SwapPurpose::Inventory, 0.0, None, dec!(5))
            .is_none());
    }

    #[test]
    fn test_deterministic_ids() {
        let f = factory();
        let a = f.build_swap_action(SwapPurpose::Stoploss, 42.0, TradeSide::Sell, dec!(1), false, false);
        let b = f.build_swap_action(SwapPurpose::Stoploss, 42.0, TradeSide::Sell, dec!(1), false, false);
        assert_eq!(a, b);
    }
}
