//! Stop-loss / take-profit predicates over the mark-to-market anchor.
//! Pure functions of (anchor, equity); the FSM owns when they are consulted.

use rust_decimal::Decimal;

pub struct ExitPolicy {
    stop_loss_ratio: Decimal,
    take_profit_ratio: Decimal,
}

impl ExitPolicy {
    /// Ratios are fractions in [0, 1); zero disables the corresponding exit.
    pub fn new(stop_loss_ratio: Decimal, take_profit_ratio: Decimal) -> Self {
        Self {
            stop_loss_ratio,
            take_profit_ratio,
        }
    }

    /// Equity has fallen to or below anchor * (1 - sl_ratio)
    pub fn should_stoploss(&self, anchor_value_quote: Option<Decimal>, equity: Option<Decimal>) -> bool {
        if self.stop_loss_ratio <= Decimal::ZERO {
            return false;
        }
        let (anchor, equity) = match (anchor_value_quote, equity) {
            (Some(a), Some(e)) if a > Decimal::ZERO => (a, e),
            _ => return false,
        };
        let trigger_level = anchor - (anchor * self.stop_loss_ratio);
        equity <= trigger_level
    }

    /// Equity has risen to or above anchor * (1 + tp_ratio)
    pub fn should_take_profit(
        &self,
        anchor_value_quote: Option<Decimal>,
        equity: Option<Decimal>,
    ) -> bool {
        if self.take_profit_ratio <= Decimal::ZERO {
            return false;
        }
        let (anchor, equity) = match (anchor_value_quote, equity) {
            (Some(a), Some(e)) if a > Decimal::ZERO => (a, e),
            _ => return false,
        };
        let trigger_level = anchor + (anchor * self.take_profit_ratio);
        equity >= trigger_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stoploss_triggers_at_threshold() {
        let policy = ExitPolicy::new(dec!(0.10), dec!(0));
        // anchor=100, sl=10% -> trigger at equity <= 90
        assert!(policy.should_stoploss(Some(dec!(100)), Some(dec!(90))));
        assert!(policy.should_stoploss(Some(dec!(100)), Some(dec!(80))));
        assert!(!policy.should_stoploss(Some(dec!(100)), Some(dec!(90.01))));
    }

    #[test]
    fn test_stoploss_disabled_when_ratio_zero() {
        let policy = ExitPolicy::new(dec!(0), dec!(0));
        assert!(!policy.should_stoploss(Some(dec!(100)), Some(dec!(1))));
    }

    #[test]
    fn test_stoploss_requires_anchor_and_equity() {
        let policy = ExitPolicy::new(dec!(0.10), dec!(0));
        assert!(!policy.should_stoploss(None, Some(dec!(1))));
        assert!(!policy.should_stoploss(Some(dec!(0)), Some(dec!(1))));
        assert!(!policy.should_stoploss(Some(dec!(100)), None));
    }

    #[test]
    fn test_take_profit_triggers_at_threshold() {
        let policy = ExitPolicy::new(dec!(0), dec!(0.20));
        // anchor=100, tp=20% -> trigger at equity >= 120
        assert!(policy.should_take_profit(Some(dec!(100)), Some(dec!(120))));
        assert!(policy.should_take_profit(Some(dec!(100)), Some(dec!(150))));
        assert!(!policy.should_take_profit(Some(dec!(100)), Some(dec!(119.99))));
    }

    #[test]
    fn test_take_profit_disabled_when_ratio_zero() {
        let policy = ExitPolicy::new(dec!(0.10), dec!(0));
        assert!(!policy.should_take_profit(Some(dec!(100)), Some(dec!(1000))));
    }
}
