//! Uniswap-v3 liquidity math over Decimal rationals.
//!
//! For a range [lower, upper) and spot price p inside it, the equilibrium
//! deposit satisfies quote = r * base with
//!   r = sqrt(p) * sqrt(upper) * (sqrt(p) - sqrt(lower)) / (sqrt(upper) - sqrt(p))
//! which is what both v3 ticks and Meteora bins converge to for a
//! both-sided deposit at the current price.

use rust_decimal::{Decimal, MathematicalOps};

pub struct V3Math;

impl V3Math {
    /// Equilibrium quote-per-base deposit ratio for `price` inside `[lower, upper)`.
    /// Returns None unless `0 < lower < price < upper`.
    pub fn quote_per_base_ratio(price: Decimal, lower: Decimal, upper: Decimal) -> Option<Decimal> {
        if price <= Decimal::ZERO || lower <= Decimal::ZERO || upper <= Decimal::ZERO {
            return None;
        }
        if lower >= upper {
            return None;
        }
        if !(lower < price && price < upper) {
            return None;
        }
        let sqrt_p = price.sqrt()?;
        let sqrt_a = lower.sqrt()?;
        let sqrt_b = upper.sqrt()?;
        let denom = sqrt_b - sqrt_p;
        let numer = sqrt_p * sqrt_b * (sqrt_p - sqrt_a);
        if denom <= Decimal::ZERO || numer <= Decimal::ZERO {
            return None;
        }
        let ratio = numer / denom;
        (ratio > Decimal::ZERO).then_some(ratio)
    }

    /// Split a quote-denominated value V into target (base, quote) amounts so
    /// that quote = ratio * base and base * price + quote = V.
    pub fn target_amounts_from_value(
        value_quote: Decimal,
        price: Decimal,
        ratio_quote_per_base: Decimal,
    ) -> Option<(Decimal, Decimal)> {
        if value_quote <= Decimal::ZERO
            || price <= Decimal::ZERO
            || ratio_quote_per_base <= Decimal::ZERO
        {
            return None;
        }
        let base_amount = value_quote / (price + ratio_quote_per_base);
        if base_amount <= Decimal::ZERO {
            return None;
        }
        let quote_amount = value_quote - (base_amount * price);
        if quote_amount < Decimal::ZERO {
            return None;
        }
        Some((base_amount, quote_amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ratio_rejects_price_outside_range() {
        assert!(V3Math::quote_per_base_ratio(dec!(0.8), dec!(0.9), dec!(1.1)).is_none());
        assert!(V3Math::quote_per_base_ratio(dec!(1.2), dec!(0.9), dec!(1.1)).is_none());
        // Boundary is exclusive on both sides
        assert!(V3Math::quote_per_base_ratio(dec!(0.9), dec!(0.9), dec!(1.1)).is_none());
        assert!(V3Math::quote_per_base_ratio(dec!(1.1), dec!(0.9), dec!(1.1)).is_none());
    }

    #[test]
    fn test_ratio_rejects_degenerate_inputs() {
        assert!(V3Math::quote_per_base_ratio(dec!(1), dec!(0), dec!(2)).is_none());
        assert!(V3Math::quote_per_base_ratio(dec!(1), dec!(2), dec!(0.5)).is_none());
        assert!(V3Math::quote_per_base_ratio(dec!(-1), dec!(0.9), dec!(1.1)).is_none());
    }

    #[test]
    fn test_ratio_centered_symmetric_range() {
        // Geometric range around p=1: lower = 1/f, upper = f with f = sqrt(1.1).
        // At the center the deposit is close to balanced (r near p).
        let lower = dec!(1) / dec!(1.1).sqrt().unwrap();
        let upper = dec!(1.1).sqrt().unwrap();
        let ratio = V3Math::quote_per_base_ratio(dec!(1), lower, upper).unwrap();
        let diff = (ratio - dec!(1)).abs();
        assert!(diff < dec!(0.01), "ratio {} not near 1", ratio);
    }

    #[test]
    fn test_ratio_skews_toward_quote_near_upper_bound() {
        // Spot near the upper bound: almost all of the deposit is quote.
        let ratio = V3Math::quote_per_base_ratio(dec!(1.09), dec!(0.9), dec!(1.1)).unwrap();
        assert!(ratio > dec!(10), "expected large quote skew, got {}", ratio);
    }

    #[test]
    fn test_target_amounts_preserve_value() {
        let price = dec!(20);
        let ratio = dec!(35);
        let value = dec!(1000);
        let (base, quote) = V3Math::target_amounts_from_value(value, price, ratio).unwrap();
        assert!(base > Decimal::ZERO && quote > Decimal::ZERO);
        // base * price + quote reconstructs V exactly in Decimal
        assert_eq!(base * price + quote, value);
    }

    #[test]
    fn test_target_amounts_follow_ratio() {
        let (base, quote) = V3Math::target_amounts_from_value(dec!(500), dec!(2), dec!(8)).unwrap();
        // quote / base == ratio up to division rounding
        let implied = quote / base;
        assert!((implied - dec!(8)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_target_amounts_reject_non_positive() {
        assert!(V3Math::target_amounts_from_value(dec!(0), dec!(1), dec!(1)).is_none());
        assert!(V3Math::target_amounts_from_value(dec!(10), dec!(0), dec!(1)).is_none());
        assert!(V3Math::target_amounts_from_value(dec!(10), dec!(1), dec!(0)).is_none());
    }
}
