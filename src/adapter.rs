//! Pool domain adapter: maps between the strategy's (base, quote) orientation
//! and the on-chain pool's (token0, token1) orientation.
//!
//! Pools sort tokens by address, so a SOL-USDC strategy may sit on a pool
//! whose token0 is USDC. When the orientations differ, amounts swap sides and
//! prices/bounds invert (bounds also swap, since 1/x reverses ordering).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDomainAdapter {
    pub trading_pair: String,
    pub pool_trading_pair: String,
    pub base_token: String,
    pub quote_token: String,
    pub pool_base_token: String,
    pub pool_quote_token: String,
    pub pool_order_inverted: bool,
}

impl PoolDomainAdapter {
    /// Build from "BASE-QUOTE" pair strings. A missing pool pair means the
    /// pool uses the strategy orientation.
    pub fn from_pairs(trading_pair: &str, pool_trading_pair: Option<&str>) -> Self {
        let pool_pair = pool_trading_pair.unwrap_or(trading_pair);
        let (base, quote) = split_pair(trading_pair);
        let (pool_base, pool_quote) = split_pair(pool_pair);
        let inverted = !base.is_empty() && pool_base == quote && pool_quote == base;
        Self {
            trading_pair: trading_pair.to_string(),
            pool_trading_pair: pool_pair.to_string(),
            base_token: base,
            quote_token: quote,
            pool_base_token: pool_base,
            pool_quote_token: pool_quote,
            pool_order_inverted: inverted,
        }
    }

    pub fn pool_amounts_to_strategy(&self, pool_base: Decimal, pool_quote: Decimal) -> (Decimal, Decimal) {
        if self.pool_order_inverted {
            (pool_quote, pool_base)
        } else {
            (pool_base, pool_quote)
        }
    }

    pub fn strategy_amounts_to_pool(&self, base_amt: Decimal, quote_amt: Decimal) -> (Decimal, Decimal) {
        if self.pool_order_inverted {
            (quote_amt, base_amt)
        } else {
            (base_amt, quote_amt)
        }
    }

    pub fn pool_price_to_strategy(&self, price: Decimal) -> Decimal {
        invert_price(price, self.pool_order_inverted)
    }

    pub fn strategy_price_to_pool(&self, price: Decimal) -> Decimal {
        invert_price(price, self.pool_order_inverted)
    }

    /// Map bounds across orientations. Inversion swaps the bounds too:
    /// [1/upper, 1/lower], reordered defensively for degenerate inputs.
    pub fn pool_bounds_to_strategy(&self, lower: Decimal, upper: Decimal) -> (Decimal, Decimal) {
        invert_bounds(lower, upper, self.pool_order_inverted)
    }

    pub fn strategy_bounds_to_pool(&self, lower: Decimal, upper: Decimal) -> (Decimal, Decimal) {
        invert_bounds(lower, upper, self.pool_order_inverted)
    }
}

fn split_pair(pair: &str) -> (String, String) {
    let mut parts = pair.split('-');
    let first = parts.next().unwrap_or("").to_string();
    let second = parts.next().unwrap_or("").to_string();
    (first, second)
}

fn invert_price(price: Decimal, inverted: bool) -> Decimal {
    if !inverted || price <= Decimal::ZERO {
        return price;
    }
    Decimal::ONE / price
}

fn invert_bounds(lower: Decimal, upper: Decimal, inverted: bool) -> (Decimal, Decimal) {
    if !inverted || lower <= Decimal::ZERO || upper <= Decimal::ZERO {
        return (lower, upper);
    }
    let mapped_lower = Decimal::ONE / upper;
    let mapped_upper = Decimal::ONE / lower;
    if mapped_lower > mapped_upper {
        (mapped_upper, mapped_lower)
    } else {
        (mapped_lower, mapped_upper)
    }
}
