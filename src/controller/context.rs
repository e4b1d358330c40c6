//! Persistent controller state. One instance per controller, owned
//! exclusively by it; every mutation happens inside the tick on a single
//! thread, so plain fields are enough.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::barrier::BalanceSyncBarrier;
use crate::cost_filter::FeeEstimatorState;
use crate::ledger::BudgetLedger;

/// Rate-limit window bookkeeping cap
const REBALANCE_TS_CAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    EntryOpen,
    EntrySwap,
    Active,
    RebalanceStop,
    RebalanceSwap,
    RebalanceOpen,
    StoplossStop,
    StoplossSwap,
    TakeProfitStop,
    ExitSwap,
    Cooldown,
}

impl ControllerState {
    /// States that the manual kill switch must not preempt: the controller
    /// is already tearing down.
    pub fn in_teardown(&self) -> bool {
        matches!(
            self,
            ControllerState::StoplossStop
                | ControllerState::StoplossSwap
                | ControllerState::TakeProfitStop
                | ControllerState::ExitSwap
        )
    }
}

#[derive(Debug, Clone)]
pub struct ControllerContext {
    pub state: ControllerState,
    pub state_since_ts: f64,
    pub cooldown_until_ts: f64,

    /// Mark-to-market book value fixed at first observable equity, capped by
    /// the configured budget. Reference for all stop-loss/take-profit tests.
    pub anchor_value_quote: Option<Decimal>,
    /// Anchor captured when a close begins; folded into realized totals once
    /// the close confirms.
    pub pending_realized_anchor: Option<Decimal>,
    pub realized_pnl_quote: Decimal,
    pub realized_volume_quote: Decimal,

    pub out_of_range_since: Option<f64>,
    pub rebalance_timestamps: VecDeque<f64>,
    pub last_rebalance_ts: f64,
    pub rebalance_signal_reason: Option<String>,

    pub pending_open_lp_id: Option<String>,
    pub pending_close_lp_id: Option<String>,
    pub pending_swap_id: Option<String>,
    pub pending_swap_since_ts: f64,

    pub inventory_swap_attempts: u32,
    pub normalization_swap_attempts: u32,
    pub stoploss_swap_attempts: u32,
    pub exit_swap_attempts: u32,
    pub inventory_balance_refresh_attempts: u32,
    pub stoploss_balance_refresh_attempts: u32,
    pub exit_balance_refresh_attempts: u32,
    pub last_inventory_swap_ts: f64,
    pub last_normalization_swap_ts: f64,
    pub last_stoploss_swap_ts: f64,
    pub last_exit_swap_ts: f64,
    pub last_exit_refresh_attempt_ts: f64,

    pub last_exit_reason: Option<String>,
    pub last_decision_reason: Option<String>,

    pub balance_barrier: Option<BalanceSyncBarrier>,
    pub awaiting_balance_refresh: bool,
    pub awaiting_balance_refresh_since: f64,
    /// Hint to the external balance manager: keep refreshing until this ts
    pub force_balance_refresh_until_ts: f64,
    pub force_balance_refresh_reason: Option<String>,

    pub failure_blocked: bool,
    pub failure_reason: Option<String>,

    /// Fee estimator per LP executor; each tracks its position address and
    /// resets itself when the address changes.
    pub fee_estimators: BTreeMap<String, FeeEstimatorState>,

    pub ledger: BudgetLedger,
    /// Swap executors already folded into the ledger
    pub handled_swap_ids: BTreeSet<String>,
    /// LP executors whose open is currently reflected in the ledger
    pub ledger_open_ids: BTreeSet<String>,
}

impl Default for ControllerContext {
    fn default() -> Self {
        Self {
            state: ControllerState::Idle,
            state_since_ts: 0.0,
            cooldown_until_ts: 0.0,
            anchor_value_quote: None,
            pending_realized_anchor: None,
            realized_pnl_quote: Decimal::ZERO,
            realized_volume_quote: Decimal::ZERO,
            out_of_range_since: None,
            rebalance_timestamps: VecDeque::new(),
            last_rebalance_ts: 0.0,
            rebalance_signal_reason: None,
            pending_open_lp_id: None,
            pending_close_lp_id: None,
            pending_swap_id: None,
            pending_swap_since_ts: 0.0,
            inventory_swap_attempts: 0,
            normalization_swap_attempts: 0,
            stoploss_swap_attempts: 0,
            exit_swap_attempts: 0,
            inventory_balance_refresh_attempts: 0,
            stoploss_balance_refresh_attempts: 0,
            exit_balance_refresh_attempts: 0,
            last_inventory_swap_ts: 0.0,
            last_normalization_swap_ts: 0.0,
            last_stoploss_swap_ts: 0.0,
            last_exit_swap_ts: 0.0,
            last_exit_refresh_attempt_ts: 0.0,
            last_exit_reason: None,
            last_decision_reason: None,
            balance_barrier: None,
            awaiting_balance_refresh: false,
            awaiting_balance_refresh_since: 0.0,
            force_balance_refresh_until_ts: 0.0,
            force_balance_refresh_reason: None,
            failure_blocked: false,
            failure_reason: None,
            fee_estimators: BTreeMap::new(),
            ledger: BudgetLedger::default(),
            handled_swap_ids: BTreeSet::new(),
            ledger_open_ids: BTreeSet::new(),
        }
    }
}

impl ControllerContext {
    pub fn with_ledger(configured_cap: Decimal) -> Self {
        Self {
            ledger: BudgetLedger::new(configured_cap),
            ..Default::default()
        }
    }

    pub fn push_rebalance_ts(&mut self, now: f64) {
        if self.rebalance_timestamps.len() >= REBALANCE_TS_CAP {
            self.rebalance_timestamps.pop_front();
        }
        self.rebalance_timestamps.push_back(now);
    }

    /// Clear transient per-cycle fields. Called on entry to Idle/Cooldown.
    pub fn clear_transients(&mut self) {
        self.pending_open_lp_id = None;
        self.pending_close_lp_id = None;
        self.pending_swap_id = None;
        self.pending_swap_since_ts = 0.0;
        self.inventory_swap_attempts = 0;
        self.normalization_swap_attempts = 0;
        self.stoploss_swap_attempts = 0;
        self.exit_swap_attempts = 0;
        self.inventory_balance_refresh_attempts = 0;
        self.stoploss_balance_refresh_attempts = 0;
        self.exit_balance_refresh_attempts = 0;
        self.out_of_range_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_starts_idle() {
        let ctx = ControllerContext::default();
        assert_eq!(ctx.state, ControllerState::Idle);
        assert!(ctx.anchor_value_quote.is_none());
        assert!(!ctx.failure_blocked);
    }

    #[test]
    fn test_rebalance_ts_ring_buffer_cap() {
        let mut ctx = ControllerContext::default();
        for i in 0..250 {
            ctx.push_rebalance_ts(i as f64);
        }
        assert_eq!(ctx.rebalance_timestamps.len(), 200);
        assert_eq!(ctx.rebalance_timestamps.front(), Some(&50.0));
    }

    #[test]
    fn test_clear_transients_keeps_anchor_and_realized() {
        let mut ctx = ControllerContext::default();
        ctx.anchor_value_quote = Some(Decimal::ONE_HUNDRED);
        ctx.realized_volume_quote = Decimal::TEN;
        ctx.pending_swap_id = Some("swap1".to_string());
        ctx.inventory_swap_attempts = 2;
        ctx.out_of_range_since = Some(5.0);
        ctx.clear_transients();
        assert_eq!(ctx.anchor_value_quote, Some(Decimal::ONE_HUNDRED));
        assert_eq!(ctx.realized_volume_quote, Decimal::TEN);
        assert!(ctx.pending_swap_id.is_none());
        assert_eq!(ctx.inventory_swap_attempts, 0);
        assert!(ctx.out_of_range_since.is_none());
    }

    #[test]
    fn test_teardown_states() {
        assert!(ControllerState::StoplossStop.in_teardown());
        assert!(ControllerState::ExitSwap.in_teardown());
        assert!(ControllerState::TakeProfitStop.in_teardown());
        assert!(!ControllerState::Active.in_teardown());
        assert!(!ControllerState::RebalanceStop.in_teardown());
    }
}
