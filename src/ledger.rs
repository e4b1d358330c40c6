//! Budget ledger: tracks wallet vs deployed capital for one controller and
//! caps the total at the quote-denominated anchor. The cap only ever shaves
//! surplus off the wallet side (quote first, then base); deployed capital is
//! what the chain says it is and is never reduced by bookkeeping.

use rust_decimal::Decimal;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetLedger {
    pub wallet_base: Decimal,
    pub wallet_quote: Decimal,
    pub deployed_base: Decimal,
    pub deployed_quote: Decimal,
    /// Configured position_value_quote; zero means uncapped
    configured_cap: Decimal,
    /// Mark-to-market anchor once fixed; tightens the cap further
    anchor_value_quote: Option<Decimal>,
    initialized: bool,
}

impl BudgetLedger {
    pub fn new(configured_cap: Decimal) -> Self {
        Self {
            configured_cap: configured_cap.max(Decimal::ZERO),
            ..Default::default()
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Seed wallet amounts from the first usable balance snapshot, capped.
    pub fn initialize(&mut self, wallet_base: Decimal, wallet_quote: Decimal, price: Decimal) {
        if self.initialized {
            return;
        }
        self.wallet_base = wallet_base;
        self.wallet_quote = wallet_quote;
        self.initialized = true;
        self.apply_cap(price);
    }

    pub fn set_anchor(&mut self, anchor_value_quote: Decimal) {
        if anchor_value_quote > Decimal::ZERO {
            self.anchor_value_quote = Some(anchor_value_quote);
        }
    }

    pub fn clear_anchor(&mut self) {
        self.anchor_value_quote = None;
    }

    /// Effective cap: the configured budget tightened by the anchor once fixed.
    /// None means uncapped.
    pub fn effective_cap(&self) -> Option<Decimal> {
        match (self.configured_cap > Decimal::ZERO, self.anchor_value_quote) {
            (true, Some(anchor)) => Some(self.configured_cap.min(anchor)),
            (true, None) => Some(self.configured_cap),
            (false, Some(anchor)) => Some(anchor),
            (false, None) => None,
        }
    }

    pub fn deployed_value(&self, price: Decimal) -> Decimal {
        self.deployed_base * price + self.deployed_quote
    }

    pub fn wallet_value(&self, price: Decimal) -> Decimal {
        self.wallet_base * price + self.wallet_quote
    }

    pub fn total_value(&self, price: Decimal) -> Decimal {
        self.deployed_value(price) + self.wallet_value(price)
    }

    /// Confirmed LP open: capital moves wallet -> deployed
    pub fn record_open(&mut self, base: Decimal, quote: Decimal, price: Decimal) {
        self.wallet_base -= base;
        self.wallet_quote -= quote;
        self.deployed_base += base;
        self.deployed_quote += quote;
        self.apply_cap(price);
    }

    /// Confirmed LP close: capital moves deployed -> wallet
    pub fn record_close(&mut self, base: Decimal, quote: Decimal, price: Decimal) {
        self.deployed_base -= base;
        self.deployed_quote -= quote;
        self.wallet_base += base;
        self.wallet_quote += quote;
        self.apply_cap(price);
    }

    /// Confirmed swap fill: deltas move within the wallet
    pub fn record_swap_delta(&mut self, delta_base: Decimal, delta_quote: Decimal, price: Decimal) {
        self.wallet_base += delta_base;
        self.wallet_quote += delta_quote;
        self.apply_cap(price);
    }

    /// Enforce total <= effective cap by shaving surplus off the wallet,
    /// quote first, then base. Deployed amounts are untouched.
    pub fn apply_cap(&mut self, price: Decimal) {
        let cap = match self.effective_cap() {
            Some(cap) => cap,
            None => return,
        };
        if price <= Decimal::ZERO {
            return;
        }
        let total = self.total_value(price);
        let mut surplus = total - cap;
        if surplus <= Decimal::ZERO {
            return;
        }
        debug!("budget cap shave: total={} cap={} surplus={}", total, cap, surplus);
        let quote_shave = surplus.min(self.wallet_quote.max(Decimal::ZERO));
        self.wallet_quote -= quote_shave;
        surplus -= quote_shave;
        if surplus > Decimal::ZERO {
            let base_shave = (surplus / price).min(self.wallet_base.max(Decimal::ZERO));
            self.wallet_base -= base_shave;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_initialize_caps_wallet() {
        let mut ledger = BudgetLedger::new(dec!(200));
        ledger.initialize(dec!(0), dec!(1000), dec!(20));
        assert_eq!(ledger.wallet_quote, dec!(200));
        assert_eq!(ledger.wallet_base, dec!(0));
        assert!(ledger.is_initialized());
    }

    #[test]
    fn test_initialize_is_one_shot() {
        let mut ledger = BudgetLedger::new(dec!(200));
        ledger.initialize(dec!(0), dec!(100), dec!(20));
        ledger.initialize(dec!(5), dec!(500), dec!(20));
        assert_eq!(ledger.wallet_quote, dec!(100));
    }

    #[test]
    fn test_open_moves_wallet_to_deployed() {
        let mut ledger = BudgetLedger::new(dec!(200));
        ledger.initialize(dec!(5), dec!(100), dec!(20)); // exactly at the cap
        ledger.record_open(dec!(2), dec!(50), dec!(20));
        assert_eq!(ledger.deployed_base, dec!(2));
        assert_eq!(ledger.deployed_quote, dec!(50));
        assert_eq!(ledger.total_value(dec!(20)), dec!(200));
    }

    #[test]
    fn test_close_reverses_open() {
        let mut ledger = BudgetLedger::new(dec!(200));
        ledger.initialize(dec!(0), dec!(200), dec!(20));
        ledger.record_open(dec!(0), dec!(150), dec!(20));
        ledger.record_close(dec!(0), dec!(150), dec!(20));
        assert_eq!(ledger.deployed_quote, dec!(0));
        assert_eq!(ledger.wallet_quote, dec!(200));
    }

    #[test]
    fn test_swap_delta_stays_within_wallet() {
        let mut ledger = BudgetLedger::new(dec!(200));
        ledger.initialize(dec!(0), dec!(200), dec!(20));
        // Buy 5 base for 100 quote
        ledger.record_swap_delta(dec!(5), dec!(-100), dec!(20));
        assert_eq!(ledger.wallet_base, dec!(5));
        assert_eq!(ledger.wallet_quote, dec!(100));
        assert_eq!(ledger.total_value(dec!(20)), dec!(200));
    }

    #[test]
    fn test_anchor_tightens_cap() {
        let mut ledger = BudgetLedger::new(dec!(200));
        ledger.initialize(dec!(0), dec!(200), dec!(20));
        ledger.set_anchor(dec!(150));
        assert_eq!(ledger.effective_cap(), Some(dec!(150)));
        ledger.apply_cap(dec!(20));
        assert_eq!(ledger.wallet_quote, dec!(150));
    }

    #[test]
    fn test_cap_shaves_quote_before_base() {
        let mut ledger = BudgetLedger::new(dec!(100));
        ledger.wallet_base = dec!(10); // 200 at price 20
        ledger.wallet_quote = dec!(50);
        ledger.initialized = true;
        ledger.apply_cap(dec!(20));
        // surplus 150: quote 50 gone first, then 5 base
        assert_eq!(ledger.wallet_quote, dec!(0));
        assert_eq!(ledger.wallet_base, dec!(5));
        assert_eq!(ledger.total_value(dec!(20)), dec!(100));
    }

    #[test]
    fn test_cap_never_reduces_deployed() {
        let mut ledger = BudgetLedger::new(dec!(100));
        ledger.deployed_quote = dec!(180);
        ledger.wallet_quote = dec!(40);
        ledger.initialized = true;
        ledger.apply_cap(dec!(20));
        // Deployed exceeds the cap on its own: wallet zeroed, deployed intact
        assert_eq!(ledger.deployed_quote, dec!(180));
        assert_eq!(ledger.wallet_quote, dec!(0));
    }

    #[test]
    fn test_containment_over_mixed_sequence() {
        let price = dec!(20);
        let mut ledger = BudgetLedger::new(dec!(200));
        ledger.initialize(dec!(3), dec!(500), price);
        ledger.set_anchor(dec!(200));
        ledger.record_swap_delta(dec!(4), dec!(-80), price);
        ledger.record_open(dec!(4), dec!(40), price);
        ledger.record_swap_delta(dec!(-1), dec!(19), price);
        ledger.record_close(dec!(4), dec!(40), price);
        let cap = ledger.effective_cap().unwrap();
        assert!(
            ledger.total_value(price) <= cap + dec!(0.000000000001),
            "total {} exceeds cap {}",
            ledger.total_value(price),
            cap
        );
    }

    #[test]
    fn test_uncapped_ledger_passes_through() {
        let mut ledger = BudgetLedger::new(dec!(0));
        ledger.initialize(dec!(100), dec!(100000), dec!(20));
        assert_eq!(ledger.effective_cap(), None);
        assert_eq!(ledger.wallet_quote, dec!(100000));
    }
}
