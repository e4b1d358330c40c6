// Core data structures for the tick interface.
// The controller consumes a Snapshot per tick and emits a Decision;
// everything here is a plain value type with no I/O attached.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Swap direction on the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// How an executor finished, as reported by the executor layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseType {
    Completed,
    Failed,
    Cancelled,
}

/// Lifecycle tag reported by the LP position executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LpState {
    Opening,
    InRange,
    OutOfRange,
    Closing,
    Complete,
    NotActive,
    RetriesExceeded,
}

impl fmt::Display for LpState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LpState::Opening => write!(f, "OPENING"),
            LpState::InRange => write!(f, "IN_RANGE"),
            LpState::OutOfRange => write!(f, "OUT_OF_RANGE"),
            LpState::Closing => write!(f, "CLOSING"),
            LpState::Complete => write!(f, "COMPLETE"),
            LpState::NotActive => write!(f, "NOT_ACTIVE"),
            LpState::RetriesExceeded => write!(f, "RETRIES_EXCEEDED"),
        }
    }
}

/// Why a swap executor was created.
/// The wire-level `level_id` string is what the router executor receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapPurpose {
    /// Pre-open conversion toward the policy's target base/quote split
    Inventory,
    /// Drift correction between retries of the inventory phase
    InventoryRebalance,
    /// Post-close SELL of residual base after stop-loss / take-profit
    ExitLiquidation,
    /// Direct wallet liquidation when stop-loss fires with no open LP
    Stoploss,
}

impl SwapPurpose {
    pub fn level_id(&self) -> &'static str {
        match self {
            SwapPurpose::Inventory => "inventory",
            SwapPurpose::InventoryRebalance => "inventory_rebalance",
            SwapPurpose::ExitLiquidation => "liquidate",
            SwapPurpose::Stoploss => "stoploss",
        }
    }

    pub fn from_level_id(level_id: &str) -> Option<SwapPurpose> {
        match level_id {
            "inventory" => Some(SwapPurpose::Inventory),
            "inventory_rebalance" => Some(SwapPurpose::InventoryRebalance),
            "liquidate" => Some(SwapPurpose::ExitLiquidation),
            "stoploss" => Some(SwapPurpose::Stoploss),
            _ => None,
        }
    }

    /// Keep-precedence when the concurrency guard finds multiple live swaps.
    /// Higher wins.
    pub fn precedence(&self) -> u8 {
        match self {
            SwapPurpose::ExitLiquidation => 4,
            SwapPurpose::Stoploss => 3,
            SwapPurpose::InventoryRebalance => 2,
            SwapPurpose::Inventory => 1,
        }
    }
}

/// One LP position executor as seen in a snapshot.
/// Amounts, prices and bounds are already in strategy (base-quote) orientation;
/// the snapshot builder applies the pool-domain adapter before this struct exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LPView {
    pub executor_id: String,
    pub is_active: bool,
    pub is_done: bool,
    pub close_type: Option<CloseType>,
    pub state: Option<LpState>,
    pub position_address: Option<String>,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    pub base_fee: Decimal,
    pub quote_fee: Decimal,
    pub lower_price: Option<Decimal>,
    pub upper_price: Option<Decimal>,
    pub current_price: Option<Decimal>,
    pub out_of_range_since: Option<f64>,
}

impl LPView {
    /// A position exists on-chain and is earning (or out of range but live).
    /// Unknown lifecycle tags fall back to "has a position address".
    pub fn is_open(&self) -> bool {
        match self.state {
            Some(LpState::InRange) | Some(LpState::OutOfRange) => true,
            Some(LpState::Complete) | Some(LpState::NotActive) | Some(LpState::RetriesExceeded) => {
                false
            }
            _ => self.position_address.is_some(),
        }
    }

    pub fn is_closed(&self) -> bool {
        if self.is_done {
            return true;
        }
        match self.state {
            Some(LpState::Complete) => true,
            Some(LpState::NotActive) => self.position_address.is_none(),
            _ => false,
        }
    }

    pub fn in_transition(&self) -> bool {
        matches!(self.state, Some(LpState::Opening) | Some(LpState::Closing))
    }

    pub fn is_failed(&self) -> bool {
        self.state == Some(LpState::RetriesExceeded) || self.close_type == Some(CloseType::Failed)
    }

    /// Mark-to-market value of the position including unclaimed fees
    pub fn value_with_fees(&self, price: Decimal) -> Decimal {
        (self.base_amount + self.base_fee) * price + (self.quote_amount + self.quote_fee)
    }

    /// Base-side holdings including unclaimed base fees
    pub fn base_with_fees(&self) -> Decimal {
        self.base_amount.abs() + self.base_fee.abs()
    }
}

/// One router swap executor as seen in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapView {
    pub executor_id: String,
    pub is_active: bool,
    pub is_done: bool,
    pub close_type: Option<CloseType>,
    pub timestamp: f64,
    pub purpose: Option<SwapPurpose>,
    pub amount: Decimal,
    /// Realized wallet deltas reported by the executor after fill
    pub delta_base: Option<Decimal>,
    pub delta_quote: Option<Decimal>,
}

impl SwapView {
    pub fn completed(&self) -> bool {
        self.is_done && self.close_type == Some(CloseType::Completed)
    }
}

/// Immutable per-tick input. `now` is the only time source the core may use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub now: f64,
    /// Quote per base; None when the price feed is unavailable
    pub current_price: Option<Decimal>,
    pub balance_fresh: bool,
    /// Timestamp of the last wallet balance update
    pub balance_update_ts: f64,
    pub wallet_base: Decimal,
    pub wallet_quote: Decimal,
    pub lp: BTreeMap<String, LPView>,
    pub swaps: BTreeMap<String, SwapView>,
    pub active_lp: Vec<LPView>,
    pub active_swaps: Vec<SwapView>,
}

impl Snapshot {
    /// Effective price, rejecting non-positive values
    pub fn price(&self) -> Option<Decimal> {
        self.current_price.filter(|p| *p > Decimal::ZERO)
    }
}

/// High-level classification of a decision, for logs and dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentFlow {
    None,
    Entry,
    Rebalance,
    Stoploss,
    TakeProfit,
    Failure,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStage {
    None,
    Wait,
    SubmitLp,
    StopLp,
    SubmitSwap,
}

/// What the controller decided this tick and why.
/// `reason` is a stable snake_case string; every wait path carries one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub flow: IntentFlow,
    pub stage: IntentStage,
    pub reason: String,
}

impl Intent {
    pub fn new(flow: IntentFlow, stage: IntentStage, reason: impl Into<String>) -> Self {
        Self {
            flow,
            stage,
            reason: reason.into(),
        }
    }
}

/// LP executor create config, in pool orientation (consumed by the external executor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpExecutorConfig {
    pub id: String,
    pub timestamp: f64,
    pub connector_name: String,
    pub pool_address: String,
    pub trading_pair: String,
    pub base_token: String,
    pub quote_token: String,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    /// 0 = both sides, 1 = quote only, 2 = base only
    pub side: u8,
    pub keep_position: bool,
    pub budget_key: String,
    /// Supplied by the external budget coordinator; passes through untouched
    pub budget_reservation_id: Option<String>,
    pub extra_params: Option<serde_json::Value>,
}

/// Router swap executor create config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapExecutorConfig {
    pub id: String,
    pub timestamp: f64,
    pub connector_name: String,
    pub trading_pair: String,
    pub side: TradeSide,
    pub amount: Decimal,
    pub amount_in_is_quote: bool,
    /// Percentage points (ratio x 100); the factory rejects > 10 or <= 0
    pub slippage_pct: Decimal,
    pub pool_address: Option<String>,
    pub level_id: String,
    pub budget_key: String,
}

/// Action emitted toward the executor queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    CreateLp(LpExecutorConfig),
    CreateSwap(SwapExecutorConfig),
    Stop {
        controller_id: String,
        executor_id: String,
    },
}

impl Action {
    pub fn stop(controller_id: &str, executor_id: &str) -> Action {
        Action::Stop {
            controller_id: controller_id.to_string(),
            executor_id: executor_id.to_string(),
        }
    }
}

/// Per-tick output: intent plus the actions to submit.
/// Context mutations happen inside the controller step; a decision is
/// pure data on the way out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub intent: Intent,
    pub actions: Vec<Action>,
}

impl Decision {
    pub fn new(intent: Intent, actions: Vec<Action>) -> Self {
        Self { intent, actions }
    }

    pub fn wait(flow: IntentFlow, reason: impl Into<String>) -> Self {
        Self {
            intent: Intent::new(flow, IntentStage::Wait, reason),
            actions: Vec::new(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.intent.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lp_view(state: Option<LpState>, position: bool) -> LPView {
        LPView {
            executor_id: "lp1".to_string(),
            is_active: true,
            is_done: false,
            close_type: None,
            state,
            position_address: position.then(|| "0xabc".to_string()),
            base_amount: dec!(0),
            quote_amount: dec!(0),
            base_fee: dec!(0),
            quote_fee: dec!(0),
            lower_price: None,
            upper_price: None,
            current_price: None,
            out_of_range_since: None,
        }
    }

    #[test]
    fn test_lp_open_classification() {
        assert!(lp_view(Some(LpState::InRange), true).is_open());
        assert!(lp_view(Some(LpState::OutOfRange), true).is_open());
        assert!(!lp_view(Some(LpState::Complete), false).is_open());
        assert!(!lp_view(Some(LpState::NotActive), false).is_open());
        assert!(!lp_view(Some(LpState::RetriesExceeded), true).is_open());
        // Unknown state falls back to position address
        assert!(lp_view(None, true).is_open());
        assert!(!lp_view(None, false).is_open());
    }

    #[test]
    fn test_lp_closed_classification() {
        let mut done = lp_view(Some(LpState::Closing), true);
        done.is_done = true;
        assert!(done.is_closed());
        assert!(lp_view(Some(LpState::Complete), false).is_closed());
        // NOT_ACTIVE still holding a position address is not closed
        assert!(!lp_view(Some(LpState::NotActive), true).is_closed());
        assert!(lp_view(Some(LpState::NotActive), false).is_closed());
    }

    #[test]
    fn test_lp_failed_classification() {
        assert!(lp_view(Some(LpState::RetriesExceeded), true).is_failed());
        let mut failed = lp_view(Some(LpState::Complete), false);
        failed.close_type = Some(CloseType::Failed);
        assert!(failed.is_failed());
        assert!(!lp_view(Some(LpState::InRange), true).is_failed());
    }

    #[test]
    fn test_swap_purpose_level_id_round_trip() {
        for purpose in [
            SwapPurpose::Inventory,
            SwapPurpose::InventoryRebalance,
            SwapPurpose::ExitLiquidation,
            SwapPurpose::Stoploss,
        ] {
            assert_eq!(SwapPurpose::from_level_id(purpose.level_id()), Some(purpose));
        }
        assert_eq!(SwapPurpose::from_level_id("unknown"), None);
    }

    #[test]
    fn test_swap_purpose_precedence_order() {
        assert!(SwapPurpose::ExitLiquidation.precedence() > SwapPurpose::Stoploss.precedence());
        assert!(SwapPurpose::Stoploss.precedence() > SwapPurpose::InventoryRebalance.precedence());
        assert!(SwapPurpose::InventoryRebalance.precedence() > SwapPurpose::Inventory.precedence());
    }
}
