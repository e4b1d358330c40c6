//! Geometric range construction and tick-grid alignment.
//!
//! Ranges are centered geometrically: with f = sqrt(1 + w) the bounds are
//! (center / f, center * f), so lower * upper == center^2 and the range is
//! symmetric in log-price space. Tick alignment maps prices to the integer
//! exponent grid tick(p) = log(p) / log(tick_base).

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, MathematicalOps};

/// A proposed price range for a new position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangePlan {
    pub center_price: Decimal,
    pub lower: Decimal,
    pub upper: Decimal,
}

pub struct RangeCalculator;

impl RangeCalculator {
    /// Geometric bounds around `center_price` for a width ratio `w` in (0, 1).
    pub fn geometric_bounds(center_price: Decimal, width_ratio: Decimal) -> Option<(Decimal, Decimal)> {
        if center_price <= Decimal::ZERO {
            return None;
        }
        if width_ratio <= Decimal::ZERO || width_ratio >= Decimal::ONE {
            return None;
        }
        let factor = (Decimal::ONE + width_ratio).sqrt()?;
        let lower = center_price / factor;
        let upper = center_price * factor;
        if lower <= Decimal::ZERO || upper <= Decimal::ZERO || lower >= upper {
            return None;
        }
        Some((lower, upper))
    }

    pub fn geometric_plan(center_price: Decimal, width_ratio: Decimal) -> Option<RangePlan> {
        let (lower, upper) = Self::geometric_bounds(center_price, width_ratio)?;
        Some(RangePlan {
            center_price,
            lower,
            upper,
        })
    }

    /// Align bounds outward onto the integer tick grid: lower floors, upper
    /// ceils, both to multiples of `tick_spacing`. Rejects collapsed ranges.
    pub fn align_bounds_to_ticks(
        lower: Decimal,
        upper: Decimal,
        tick_spacing: i64,
        tick_base: Decimal,
    ) -> Option<(Decimal, Decimal)> {
        if lower <= Decimal::ZERO || upper <= Decimal::ZERO || lower >= upper {
            return None;
        }
        if tick_spacing <= 0 || tick_base <= Decimal::ONE {
            return None;
        }
        let lower_tick = Self::price_to_tick(lower, tick_base)?;
        let upper_tick = Self::price_to_tick(upper, tick_base)?;
        let spacing = tick_spacing as f64;
        let aligned_lower_tick = (lower_tick / spacing).floor() as i64 * tick_spacing;
        let aligned_upper_tick = (upper_tick / spacing).ceil() as i64 * tick_spacing;
        if aligned_lower_tick >= aligned_upper_tick {
            return None;
        }
        let aligned_lower = Self::tick_to_price(aligned_lower_tick, tick_base)?;
        let aligned_upper = Self::tick_to_price(aligned_upper_tick, tick_base)?;
        if aligned_lower <= Decimal::ZERO || aligned_upper <= Decimal::ZERO || aligned_lower >= aligned_upper
        {
            return None;
        }
        Some((aligned_lower, aligned_upper))
    }

    /// Clamp `price` to `[tick(lower)+k, tick(upper)-k]` in tick space.
    /// With `clamp_ticks <= 0` the price passes through unchanged.
    pub fn clamp_price_by_ticks(
        price: Decimal,
        lower: Decimal,
        upper: Decimal,
        tick_base: Decimal,
        clamp_ticks: i64,
    ) -> Option<Decimal> {
        if price <= Decimal::ZERO || lower <= Decimal::ZERO || upper <= Decimal::ZERO || lower >= upper
        {
            return None;
        }
        if clamp_ticks <= 0 {
            return Some(price);
        }
        if tick_base <= Decimal::ONE {
            return None;
        }
        let lower_tick = Self::price_to_tick(lower, tick_base)?;
        let upper_tick = Self::price_to_tick(upper, tick_base)?;
        let clamp_lower_tick = lower_tick + clamp_ticks as f64;
        let clamp_upper_tick = upper_tick - clamp_ticks as f64;
        if clamp_lower_tick >= clamp_upper_tick {
            return None;
        }
        let clamp_lower = Self::tick_to_price(clamp_lower_tick.floor() as i64, tick_base)?;
        let clamp_upper = Self::tick_to_price(clamp_upper_tick.ceil() as i64, tick_base)?;
        if clamp_lower >= clamp_upper {
            return None;
        }
        Some(price.clamp(clamp_lower, clamp_upper))
    }

    fn price_to_tick(price: Decimal, tick_base: Decimal) -> Option<f64> {
        let price_f = price.to_f64()?;
        let base_f = tick_base.to_f64()?;
        if price_f <= 0.0 || base_f <= 1.0 {
            return None;
        }
        Some(price_f.ln() / base_f.ln())
    }

    fn tick_to_price(tick: i64, tick_base: Decimal) -> Option<Decimal> {
        let base_f = tick_base.to_f64()?;
        Decimal::from_f64(base_f.powi(tick as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_geometric_bounds_symmetry() {
        // lower * upper == center^2 (symmetric in log space)
        let center = dec!(20);
        let (lower, upper) = RangeCalculator::geometric_bounds(center, dec!(0.12)).unwrap();
        let product = lower * upper;
        let diff = (product - center * center).abs();
        assert!(diff < dec!(0.000000001), "product {} vs {}", product, center * center);
        assert!(lower < center && center < upper);
    }

    #[test]
    fn test_geometric_bounds_width_semantics() {
        // upper / lower == 1 + w
        let (lower, upper) = RangeCalculator::geometric_bounds(dec!(1), dec!(0.1)).unwrap();
        let spread = upper / lower;
        assert!((spread - dec!(1.1)).abs() < dec!(0.000000001));
    }

    #[test]
    fn test_geometric_bounds_rejects_percent_points() {
        // A width given as percent points (12 for "12%") must be rejected
        assert!(RangeCalculator::geometric_bounds(dec!(1), dec!(12)).is_none());
        assert!(RangeCalculator::geometric_bounds(dec!(1), dec!(1)).is_none());
        assert!(RangeCalculator::geometric_bounds(dec!(1), dec!(0)).is_none());
        assert!(RangeCalculator::geometric_bounds(dec!(0), dec!(0.1)).is_none());
    }

    #[test]
    fn test_align_widens_bounds() {
        let tick_base = dec!(1.0001);
        let (lower, upper) = RangeCalculator::geometric_bounds(dec!(1), dec!(0.1)).unwrap();
        let (a_lower, a_upper) =
            RangeCalculator::align_bounds_to_ticks(lower, upper, 60, tick_base).unwrap();
        // Outward alignment never narrows the range (up to tick rounding)
        assert!(a_lower <= lower * dec!(1.0001));
        assert!(a_upper >= upper / dec!(1.0001));
        assert!(a_lower < a_upper);
    }

    #[test]
    fn test_align_rejects_collapsed_range() {
        let tick_base = dec!(1.0001);
        assert!(RangeCalculator::align_bounds_to_ticks(dec!(2), dec!(1), 10, tick_base).is_none());
        assert!(RangeCalculator::align_bounds_to_ticks(dec!(1), dec!(2), 0, tick_base).is_none());
        assert!(RangeCalculator::align_bounds_to_ticks(dec!(1), dec!(2), 10, dec!(1)).is_none());
    }

    #[test]
    fn test_clamp_passes_through_interior_price() {
        let tick_base = dec!(1.0001);
        let clamped =
            RangeCalculator::clamp_price_by_ticks(dec!(1), dec!(0.9), dec!(1.1), tick_base, 10)
                .unwrap();
        assert_eq!(clamped, dec!(1));
    }

    #[test]
    fn test_clamp_pulls_edge_price_inward() {
        let tick_base = dec!(1.0001);
        let clamped =
            RangeCalculator::clamp_price_by_ticks(dec!(0.9001), dec!(0.9), dec!(1.1), tick_base, 100)
                .unwrap();
        assert!(clamped > dec!(0.9001));
    }

    #[test]
    fn test_clamp_zero_ticks_is_identity() {
        let tick_base = dec!(1.0001);
        let clamped =
            RangeCalculator::clamp_price_by_ticks(dec!(0.9), dec!(0.5), dec!(2), tick_base, 0)
                .unwrap();
        assert_eq!(clamped, dec!(0.9));
    }

    #[test]
    fn test_clamp_rejects_band_wider_than_range() {
        let tick_base = dec!(1.0001);
        // Range is ~2000 ticks wide; clamping 2000 ticks off each side collapses it
        assert!(RangeCalculator::clamp_price_by_ticks(
            dec!(1),
            dec!(0.9),
            dec!(1.1),
            tick_base,
            2000
        )
        .is_none());
    }
}
