//! The decision state machine. One `tick` consumes a frozen Snapshot,
//! reconciles bookkeeping (barrier, ledger, fee estimators), then dispatches
//! on the controller state. All time comes from `snapshot.now`; the FSM never
//! samples a clock, so scripted snapshots drive it deterministically.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::adapter::PoolDomainAdapter;
use crate::barrier::{refresh_backoff, BalanceSyncBarrier};
use crate::config::ControllerConfig;
use crate::controller::actions::ActionFactory;
use crate::controller::context::{ControllerContext, ControllerState};
use crate::cost_filter::CostFilter;
use crate::exit_policy::ExitPolicy;
use crate::planner::{OpenPlanner, OpenProposal, ProposalError};
use crate::policy::PoolPolicy;
use crate::rebalance::RebalanceEngine;
use crate::types::{
    Action, Decision, Intent, IntentFlow, IntentStage, LPView, LpState, Snapshot, SwapPurpose,
    SwapView, TradeSide,
};

/// A pending swap is assumed in flight for this long before the controller
/// falls back to the purpose-and-recency lookup.
const PENDING_SWAP_GRACE_SEC: f64 = 30.0;

enum SwapPhase {
    Entry,
    Rebalance,
}

impl SwapPhase {
    fn flow(&self) -> IntentFlow {
        match self {
            SwapPhase::Entry => IntentFlow::Entry,
            SwapPhase::Rebalance => IntentFlow::Rebalance,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            SwapPhase::Entry => "entry",
            SwapPhase::Rebalance => "rebalance",
        }
    }

    fn next_state(&self) -> ControllerState {
        match self {
            SwapPhase::Entry => ControllerState::EntryOpen,
            SwapPhase::Rebalance => ControllerState::RebalanceOpen,
        }
    }
}

pub struct Controller {
    config: ControllerConfig,
    policy: PoolPolicy,
    planner: OpenPlanner,
    exit_policy: ExitPolicy,
    rebalance_engine: RebalanceEngine,
    action_factory: ActionFactory,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let domain = PoolDomainAdapter::from_pairs(
            &config.trading_pair,
            config.pool_trading_pair.as_deref(),
        );
        let policy = PoolPolicy::from_config(&config, domain.clone());
        let planner = OpenPlanner::new(
            config.position_value_quote,
            config.cost_filter_fixed_cost_quote,
            config.swap_min_value_pct,
            config.auto_swap_enabled,
        );
        let exit_policy = ExitPolicy::new(config.stop_loss_pnl_pct, config.take_profit_pnl_pct);
        let rebalance_engine = RebalanceEngine::new(config.clone());
        let action_factory = ActionFactory::new(&config, domain);
        Ok(Self {
            config,
            policy,
            planner,
            exit_policy,
            rebalance_engine,
            action_factory,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// A fresh context with the ledger capped at the configured budget
    pub fn new_context(&self) -> ControllerContext {
        ControllerContext::with_ledger(self.config.position_value_quote)
    }

    /// Feed resolved pool metadata (v3 tick spacing / DLMM bin step)
    pub fn set_tick_spacing(&mut self, tick_spacing: i64) {
        self.policy.set_tick_spacing(tick_spacing);
    }

    /// Flip the manual kill switch (exposed for operator tooling)
    pub fn set_manual_kill_switch(&mut self, on: bool) {
        self.config.manual_kill_switch = on;
    }

    /// One tick: reconcile bookkeeping, then decide
    pub fn tick(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        if ctx.state_since_ts <= 0.0 {
            ctx.state_since_ts = snapshot.now;
        }
        self.reconcile(snapshot, ctx);
        let decision = self.decide(snapshot, ctx);
        ctx.last_decision_reason = Some(decision.intent.reason.clone());
        if decision.actions.is_empty() {
            debug!(
                state = ?ctx.state,
                reason = %decision.intent.reason,
                "tick"
            );
        } else {
            info!(
                state = ?ctx.state,
                reason = %decision.intent.reason,
                actions = decision.actions.len(),
                "tick"
            );
        }
        decision
    }

    // ---- reconcile -------------------------------------------------------

    /// Order matters: barrier cleanup first so the dispatch below sees an
    /// up-to-date wallet gate, then ledger folding, then fee estimation.
    fn reconcile(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) {
        self.reconcile_barrier(snapshot, ctx);
        self.reconcile_done_swaps(snapshot, ctx);
        self.reconcile_lp_ledger(snapshot, ctx);
        self.update_fee_rate_estimates(snapshot, ctx);
        self.clear_stale_balance_refresh(snapshot, ctx);
    }

    fn reconcile_barrier(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) {
        let Some(barrier) = &ctx.balance_barrier else {
            return;
        };
        if snapshot.balance_fresh && barrier.is_synced(snapshot.wallet_base, snapshot.wallet_quote)
        {
            info!(reason = %barrier.reason, "balance sync done");
            ctx.balance_barrier = None;
            ctx.awaiting_balance_refresh = false;
            ctx.awaiting_balance_refresh_since = 0.0;
            return;
        }
        if barrier.timed_out(snapshot.now) {
            warn!(
                reason = %barrier.reason,
                age = snapshot.now - barrier.created_ts,
                attempts = barrier.attempts,
                "balance sync timeout"
            );
            ctx.balance_barrier = None;
            ctx.failure_blocked = true;
            ctx.failure_reason = Some("balance_sync_timeout".to_string());
        }
    }

    fn reconcile_done_swaps(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) {
        for swap in snapshot.swaps.values() {
            if !swap.is_done || ctx.handled_swap_ids.contains(&swap.executor_id) {
                continue;
            }
            ctx.handled_swap_ids.insert(swap.executor_id.clone());
            if !swap.completed() {
                continue;
            }
            let (Some(delta_base), Some(delta_quote)) = (swap.delta_base, swap.delta_quote) else {
                continue;
            };
            if let Some(price) = snapshot.price() {
                ctx.ledger.record_swap_delta(delta_base, delta_quote, price);
            }
            // Wallet snapshot predates the fill: stall on the barrier until
            // the observed deltas land.
            if snapshot.balance_update_ts < swap.timestamp {
                let timeout = f64::from(self.config.balance_refresh_timeout_sec);
                let barrier = ctx.balance_barrier.get_or_insert_with(|| {
                    info!(swap = %swap.executor_id, "balance sync start");
                    BalanceSyncBarrier::new(
                        snapshot.wallet_base,
                        snapshot.wallet_quote,
                        "swap_settled",
                        snapshot.now,
                        timeout,
                    )
                });
                barrier.add_expected(delta_base, delta_quote, snapshot.now, timeout);
                ctx.awaiting_balance_refresh = true;
                if ctx.awaiting_balance_refresh_since <= 0.0 {
                    ctx.awaiting_balance_refresh_since = snapshot.now;
                }
            }
        }
    }

    /// Fold confirmed LP opens/closes into the budget ledger. The close
    /// returns the amounts recorded at open; realized drift arrives through
    /// the wallet refresh.
    fn reconcile_lp_ledger(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) {
        let Some(price) = snapshot.price() else {
            return;
        };
        if !ctx.ledger.is_initialized() && snapshot.balance_fresh {
            ctx.ledger
                .initialize(snapshot.wallet_base, snapshot.wallet_quote, price);
        }
        for lp in snapshot.lp.values() {
            let recorded = ctx.ledger_open_ids.contains(&lp.executor_id);
            if lp.is_open() && !recorded {
                ctx.ledger.record_open(lp.base_amount, lp.quote_amount, price);
                ctx.ledger_open_ids.insert(lp.executor_id.clone());
            } else if recorded && lp.is_closed() {
                // Deployed tracking nets out; wallet truth comes from refresh
                let deployed_base = ctx.ledger.deployed_base;
                let deployed_quote = ctx.ledger.deployed_quote;
                ctx.ledger.record_close(deployed_base, deployed_quote, price);
                ctx.ledger_open_ids.remove(&lp.executor_id);
            }
        }
    }

    fn update_fee_rate_estimates(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) {
        let Some(price) = snapshot.price() else {
            return;
        };
        for lp in &snapshot.active_lp {
            if lp.state != Some(LpState::InRange) {
                continue;
            }
            let Some(position_address) = lp.position_address.as_deref() else {
                continue;
            };
            let pending_fee_quote = lp.base_fee * price + lp.quote_fee;
            let state = ctx.fee_estimators.entry(lp.executor_id.clone()).or_default();
            CostFilter::update_fee_rate_ewma(snapshot.now, position_address, pending_fee_quote, state);
        }
    }

    fn clear_stale_balance_refresh(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) {
        if !ctx.awaiting_balance_refresh || ctx.balance_barrier.is_some() {
            return;
        }
        if ctx.awaiting_balance_refresh_since <= 0.0 {
            ctx.awaiting_balance_refresh_since = snapshot.now;
            return;
        }
        let timeout = f64::from(self.config.balance_refresh_timeout_sec);
        if (snapshot.now - ctx.awaiting_balance_refresh_since) < timeout {
            return;
        }
        warn!("awaiting_balance_refresh timeout exceeded; clearing");
        ctx.awaiting_balance_refresh = false;
        ctx.awaiting_balance_refresh_since = 0.0;
    }

    // ---- decide ----------------------------------------------------------

    fn decide(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        if let Some(decision) = self.guard_concurrency(snapshot) {
            return decision;
        }
        if self.config.manual_kill_switch && !ctx.state.in_teardown() {
            return self.force_manual_stop(snapshot, ctx);
        }
        if ctx.failure_blocked {
            let reason = ctx.failure_reason.clone().unwrap_or_else(|| "lp_failure".to_string());
            return Decision::wait(IntentFlow::Failure, reason);
        }
        if let Some(decision) = self.guard_lp_failure(snapshot, ctx) {
            return decision;
        }

        match ctx.state {
            ControllerState::Idle => self.handle_idle(snapshot, ctx),
            ControllerState::EntryOpen => self.handle_open_wait(snapshot, ctx, SwapPhase::Entry),
            ControllerState::EntrySwap => self.handle_entry_swap(snapshot, ctx),
            ControllerState::Active => self.handle_active(snapshot, ctx),
            ControllerState::RebalanceStop => self.handle_rebalance_stop(snapshot, ctx),
            ControllerState::RebalanceSwap => self.handle_rebalance_swap(snapshot, ctx),
            ControllerState::RebalanceOpen => {
                self.handle_open_wait(snapshot, ctx, SwapPhase::Rebalance)
            }
            ControllerState::StoplossStop => self.handle_stoploss_stop(snapshot, ctx),
            ControllerState::StoplossSwap => self.handle_stoploss_swap(snapshot, ctx),
            ControllerState::TakeProfitStop => self.handle_take_profit_stop(snapshot, ctx),
            ControllerState::ExitSwap => self.handle_exit_swap(snapshot, ctx),
            ControllerState::Cooldown => self.handle_cooldown(snapshot, ctx),
        }
    }

    /// At most one live LP and one live swap. Extras are stopped: lowest id
    /// wins for LPs, purpose precedence (then lowest id) for swaps.
    fn guard_concurrency(&self, snapshot: &Snapshot) -> Option<Decision> {
        if snapshot.active_swaps.len() > 1 {
            let keep = select_swap_to_keep(&snapshot.active_swaps)?;
            let actions: Vec<Action> = snapshot
                .active_swaps
                .iter()
                .filter(|swap| swap.executor_id != keep.executor_id)
                .map(|swap| Action::stop(&self.config.id, &swap.executor_id))
                .collect();
            if !actions.is_empty() {
                warn!("swap concurrency guard: stopping {} extras", actions.len());
                return Some(Decision::new(
                    Intent::new(IntentFlow::None, IntentStage::StopLp, "swap_concurrency_guard"),
                    actions,
                ));
            }
        }
        if snapshot.active_lp.len() > 1 {
            let keep = snapshot
                .active_lp
                .iter()
                .min_by(|a, b| a.executor_id.cmp(&b.executor_id))?;
            let actions: Vec<Action> = snapshot
                .active_lp
                .iter()
                .filter(|lp| lp.executor_id != keep.executor_id)
                .map(|lp| Action::stop(&self.config.id, &lp.executor_id))
                .collect();
            if !actions.is_empty() {
                warn!("lp concurrency guard: stopping {} extras", actions.len());
                return Some(Decision::new(
                    Intent::new(IntentFlow::None, IntentStage::StopLp, "lp_concurrency_guard"),
                    actions,
                ));
            }
        }
        None
    }

    /// Executor-level failure outside the open-wait states is terminal until
    /// an operator intervenes.
    fn guard_lp_failure(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Option<Decision> {
        if matches!(
            ctx.state,
            ControllerState::Idle
                | ControllerState::Cooldown
                | ControllerState::EntryOpen
                | ControllerState::RebalanceOpen
        ) {
            return None;
        }
        let lp_view = self.select_lp(snapshot, ctx)?;
        if !lp_view.is_failed() {
            return None;
        }
        let reason = if lp_view.state == Some(LpState::RetriesExceeded) {
            "retries_exceeded"
        } else {
            "executor_failed"
        };
        warn!(executor = %lp_view.executor_id, reason, "lp executor failure; blocking");
        ctx.failure_blocked = true;
        ctx.failure_reason = Some(reason.to_string());
        self.request_balance_refresh(ctx, snapshot.now, "lp_failure");
        let actions = if lp_view.is_active {
            vec![Action::stop(&self.config.id, &lp_view.executor_id)]
        } else {
            Vec::new()
        };
        Some(Decision::new(
            Intent::new(IntentFlow::Failure, IntentStage::StopLp, reason),
            actions,
        ))
    }

    // ---- state handlers --------------------------------------------------

    fn handle_idle(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        ctx.pending_open_lp_id = None;
        ctx.pending_close_lp_id = None;
        ctx.pending_swap_id = None;
        ctx.pending_swap_since_ts = 0.0;

        let lp_view = self.select_lp(snapshot, ctx);
        if ctx.pending_realized_anchor.is_some()
            && lp_view.as_ref().map_or(true, |lp| lp.is_closed())
        {
            self.record_realized_on_close(snapshot, ctx, lp_view.as_ref());
        }
        if let Some(lp) = &lp_view {
            if lp.is_open() {
                self.set_anchor_if_ready(snapshot, ctx, Some(lp));
                return self.transition(ctx, ControllerState::Active, now, IntentFlow::None, "lp_already_open", vec![]);
            }
            if lp.in_transition() {
                return self.stay(ctx, IntentFlow::None, "lp_in_transition");
            }
            if lp.is_failed() {
                return self.stay(ctx, IntentFlow::None, "lp_failed");
            }
        }
        if ctx.anchor_value_quote.is_some() {
            if let Some(decision) =
                self.maybe_stoploss(snapshot, ctx, lp_view.as_ref(), "stop_loss_idle")
            {
                return decision;
            }
        }
        if !self.can_reenter(ctx) {
            return self.stay(ctx, IntentFlow::Entry, "reenter_disabled");
        }
        if !self.is_entry_triggered(snapshot.current_price) {
            return self.stay(ctx, IntentFlow::None, "idle");
        }
        self.plan_entry_open(snapshot, ctx)
    }

    fn handle_entry_swap(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        if !self.is_entry_triggered(snapshot.current_price) {
            return self.transition(ctx, ControllerState::Idle, snapshot.now, IntentFlow::Entry, "entry_not_triggered", vec![]);
        }
        self.handle_inventory_swap_phase(snapshot, ctx, SwapPhase::Entry)
    }

    fn handle_rebalance_swap(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let lp_view = self.select_lp(snapshot, ctx);
        if let Some(decision) =
            self.maybe_stoploss(snapshot, ctx, lp_view.as_ref(), "stop_loss_rebalance")
        {
            return decision;
        }
        self.handle_inventory_swap_phase(snapshot, ctx, SwapPhase::Rebalance)
    }

    fn handle_active(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        let lp_view = match self.select_lp(snapshot, ctx) {
            Some(lp) if lp.is_open() => lp,
            _ => {
                return self.transition(ctx, ControllerState::Idle, now, IntentFlow::None, "lp_missing", vec![])
            }
        };
        if lp_view.in_transition() {
            return self.stay(ctx, IntentFlow::None, "lp_in_transition");
        }
        if let Some(decision) =
            self.maybe_stoploss(snapshot, ctx, Some(&lp_view), "stop_loss_triggered")
        {
            return decision;
        }
        self.set_anchor_if_ready(snapshot, ctx, Some(&lp_view));
        self.update_out_of_range_timer(ctx, &lp_view);

        // Take-profit outranks a simultaneous rebalance signal
        if let Some(price) = snapshot.price() {
            let equity =
                self.compute_risk_equity(snapshot, Some(&lp_view), price, ctx.anchor_value_quote);
            if self
                .exit_policy
                .should_take_profit(ctx.anchor_value_quote, equity)
            {
                ctx.last_exit_reason = Some("take_profit".to_string());
                if ctx.pending_realized_anchor.is_none() {
                    ctx.pending_realized_anchor = ctx.anchor_value_quote;
                }
                ctx.pending_open_lp_id = None;
                ctx.pending_close_lp_id = Some(lp_view.executor_id.clone());
                let stop = Action::stop(&self.config.id, &lp_view.executor_id);
                return self.transition(
                    ctx,
                    ControllerState::TakeProfitStop,
                    now,
                    IntentFlow::TakeProfit,
                    "take_profit",
                    vec![stop],
                );
            }
        }

        let signal = self.rebalance_engine.evaluate(snapshot, ctx, &lp_view);
        ctx.rebalance_signal_reason = Some(signal.reason.to_string());
        if signal.should_rebalance {
            self.rebalance_engine.record_rebalance(now, ctx);
            ctx.pending_open_lp_id = None;
            ctx.pending_close_lp_id = Some(lp_view.executor_id.clone());
            let stop = Action::stop(&self.config.id, &lp_view.executor_id);
            return self.transition(
                ctx,
                ControllerState::RebalanceStop,
                now,
                IntentFlow::Rebalance,
                signal.reason,
                vec![stop],
            );
        }
        self.stay(ctx, IntentFlow::None, "active")
    }

    /// Shared ENTRY_OPEN / REBALANCE_OPEN wait loop
    fn handle_open_wait(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ControllerContext,
        phase: SwapPhase,
    ) -> Decision {
        let now = snapshot.now;
        let flow = phase.flow();
        let lp_view = self.select_lp(snapshot, ctx);

        if matches!(phase, SwapPhase::Rebalance) {
            if let Some(decision) =
                self.maybe_stoploss(snapshot, ctx, lp_view.as_ref(), "stop_loss_rebalance")
            {
                return decision;
            }
        }

        if let Some(lp) = &lp_view {
            if lp.is_open() {
                self.set_anchor_if_ready(snapshot, ctx, Some(lp));
                ctx.pending_open_lp_id = None;
                let reason = match phase {
                    SwapPhase::Entry => "entry_opened",
                    SwapPhase::Rebalance => "rebalance_opened",
                };
                return self.transition(ctx, ControllerState::Active, now, flow, reason, vec![]);
            }
            if lp.is_failed() {
                ctx.pending_open_lp_id = None;
                let reason = match phase {
                    SwapPhase::Entry => "entry_lp_failed",
                    SwapPhase::Rebalance => "rebalance_lp_failed",
                };
                return self.enter_cooldown(ctx, now, flow, reason, vec![]);
            }
            if lp.in_transition() {
                if ctx.pending_open_lp_id.is_some() && self.open_timeout_exceeded(ctx, now) {
                    let reason = match phase {
                        SwapPhase::Entry => "entry_open_timeout",
                        SwapPhase::Rebalance => "rebalance_open_timeout",
                    };
                    let actions = vec![Action::stop(&self.config.id, &lp.executor_id)];
                    return self.enter_cooldown(ctx, now, flow, reason, actions);
                }
                return self.stay(ctx, flow, "open_in_progress");
            }
        }
        if ctx.pending_open_lp_id.is_some() && self.open_timeout_exceeded(ctx, now) {
            let reason = match phase {
                SwapPhase::Entry => "entry_open_timeout",
                SwapPhase::Rebalance => "rebalance_open_timeout",
            };
            let actions = lp_view
                .as_ref()
                .map(|lp| vec![Action::stop(&self.config.id, &lp.executor_id)])
                .unwrap_or_default();
            return self.enter_cooldown(ctx, now, flow, reason, actions);
        }
        if matches!(phase, SwapPhase::Entry) && !self.is_entry_triggered(snapshot.current_price) {
            return self.transition(ctx, ControllerState::Idle, now, flow, "entry_not_triggered", vec![]);
        }
        if !snapshot.active_swaps.is_empty() {
            return self.stay(ctx, flow, "swap_in_progress");
        }
        if ctx.pending_open_lp_id.is_some()
            && (now - ctx.state_since_ts) < f64::from(self.config.open_timeout_sec)
        {
            return self.stay(ctx, flow, "open_in_progress");
        }
        if let Some(decision) = self.barrier_gate(ctx, flow) {
            return decision;
        }
        ctx.pending_open_lp_id = None;

        match phase {
            SwapPhase::Entry => self.plan_entry_open(snapshot, ctx),
            SwapPhase::Rebalance => {
                // Let the pool settle after the close before re-opening
                let reopen_after = ctx.last_rebalance_ts + f64::from(self.config.reopen_delay_sec);
                if ctx.last_rebalance_ts > 0.0 && now < reopen_after {
                    return self.stay(ctx, flow, "reopen_delay");
                }
                let proposal = match self.build_open_proposal(snapshot, ctx) {
                    Ok(proposal) => proposal,
                    Err(err) => {
                        return self.transition(ctx, ControllerState::Idle, now, flow, err.to_string(), vec![])
                    }
                };
                if proposal.needs_swap() {
                    return self.transition(
                        ctx,
                        ControllerState::RebalanceSwap,
                        now,
                        flow,
                        "swap_needed",
                        vec![],
                    );
                }
                let Some(action) = self
                    .action_factory
                    .build_open_lp_action(&self.policy, &proposal, now)
                else {
                    return self.stay(ctx, flow, "budget_unavailable");
                };
                ctx.pending_open_lp_id = created_id(&action);
                ctx.state_since_ts = now;
                Decision::new(
                    Intent::new(flow, IntentStage::SubmitLp, "rebalance_open"),
                    vec![action],
                )
            }
        }
    }

    fn handle_rebalance_stop(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        let lp_view = self.select_lp(snapshot, ctx);
        if let Some(decision) =
            self.maybe_stoploss(snapshot, ctx, lp_view.as_ref(), "stop_loss_rebalance")
        {
            return decision;
        }
        match &lp_view {
            None => {}
            Some(lp) if lp.is_closed() => {}
            Some(lp) if lp.in_transition() => {
                return self.stay(ctx, IntentFlow::Rebalance, "rebalance_stop_in_transition");
            }
            Some(lp) => {
                // Stop not observed yet; idempotent re-emit
                ctx.pending_close_lp_id = Some(lp.executor_id.clone());
                let stop = Action::stop(&self.config.id, &lp.executor_id);
                return Decision::new(
                    Intent::new(IntentFlow::Rebalance, IntentStage::StopLp, "rebalance_stop"),
                    vec![stop],
                );
            }
        }
        self.record_realized_on_close(snapshot, ctx, lp_view.as_ref());
        ctx.pending_close_lp_id = None;
        self.transition(
            ctx,
            ControllerState::RebalanceSwap,
            now,
            IntentFlow::Rebalance,
            "rebalance_lp_closed",
            vec![],
        )
    }

    fn handle_stoploss_stop(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        let lp_view = self.select_lp(snapshot, ctx);
        match &lp_view {
            None => {}
            Some(lp) if lp.is_closed() => {}
            Some(lp) if lp.in_transition() => {
                return self.stay(ctx, IntentFlow::Stoploss, "stoploss_stop_in_transition");
            }
            Some(lp) => {
                ctx.pending_close_lp_id = Some(lp.executor_id.clone());
                let stop = Action::stop(&self.config.id, &lp.executor_id);
                return Decision::new(
                    Intent::new(IntentFlow::Stoploss, IntentStage::StopLp, "stoploss_stop"),
                    vec![stop],
                );
            }
        }
        self.record_realized_on_close(snapshot, ctx, lp_view.as_ref());
        ctx.pending_close_lp_id = None;
        if self.config.exit_full_liquidation {
            self.transition(
                ctx,
                ControllerState::ExitSwap,
                now,
                IntentFlow::Stoploss,
                "stoploss_lp_closed",
                vec![],
            )
        } else {
            // Pause was set at trigger time; transition without touching it
            self.transition(
                ctx,
                ControllerState::Cooldown,
                now,
                IntentFlow::Stoploss,
                "stoploss_lp_closed",
                vec![],
            )
        }
    }

    fn handle_take_profit_stop(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        let lp_view = self.select_lp(snapshot, ctx);
        match &lp_view {
            None => {}
            Some(lp) if lp.is_closed() => {}
            Some(lp) if lp.in_transition() => {
                return self.stay(ctx, IntentFlow::TakeProfit, "take_profit_stop_in_transition");
            }
            Some(lp) => {
                ctx.pending_close_lp_id = Some(lp.executor_id.clone());
                let stop = Action::stop(&self.config.id, &lp.executor_id);
                return Decision::new(
                    Intent::new(IntentFlow::TakeProfit, IntentStage::StopLp, "take_profit_stop"),
                    vec![stop],
                );
            }
        }
        self.record_realized_on_close(snapshot, ctx, lp_view.as_ref());
        ctx.pending_close_lp_id = None;
        if self.config.exit_full_liquidation {
            self.transition(
                ctx,
                ControllerState::ExitSwap,
                now,
                IntentFlow::TakeProfit,
                "take_profit_exit_swap",
                vec![],
            )
        } else {
            self.transition(
                ctx,
                ControllerState::Idle,
                now,
                IntentFlow::TakeProfit,
                "take_profit_closed",
                vec![],
            )
        }
    }

    /// Direct wallet liquidation: stop-loss or manual kill fired with no open
    /// LP. Sells wallet base (minus the native reserve) to quote.
    fn handle_stoploss_swap(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        if !snapshot.balance_fresh && ctx.stoploss_balance_refresh_attempts < 1 {
            self.request_balance_refresh(ctx, now, "stoploss_refresh");
            ctx.stoploss_balance_refresh_attempts += 1;
            return self.stay(ctx, IntentFlow::Stoploss, "stoploss_refresh_balance");
        }
        if self.resolve_pending_swap(snapshot, ctx, true) {
            return self.transition(
                ctx,
                ControllerState::Cooldown,
                now,
                IntentFlow::Stoploss,
                "stoploss_swap_done",
                vec![],
            );
        }
        if let Some(decision) = self.guard_pending_swap(snapshot, ctx, IntentFlow::Stoploss) {
            return decision;
        }
        if self.config.max_exit_swap_attempts > 0
            && ctx.stoploss_swap_attempts >= self.config.max_exit_swap_attempts
        {
            return self.transition(
                ctx,
                ControllerState::Cooldown,
                now,
                IntentFlow::Stoploss,
                "stoploss_swap_failed",
                vec![],
            );
        }
        if self.swap_cooldown_active(ctx.last_stoploss_swap_ts, now) {
            return self.stay(ctx, IntentFlow::Stoploss, "swap_cooldown");
        }
        if !snapshot.active_swaps.is_empty() {
            return self.stay(ctx, IntentFlow::Stoploss, "swap_in_progress");
        }
        if let Some(decision) = self.barrier_gate(ctx, IntentFlow::Stoploss) {
            return decision;
        }
        let lp_view = self.select_lp(snapshot, ctx);
        let mut base_to_sell = snapshot.wallet_base;
        if base_to_sell <= Decimal::ZERO {
            if let Some(lp) = &lp_view {
                base_to_sell = lp.base_with_fees();
            }
        }
        base_to_sell -= self.config.min_native_balance.max(Decimal::ZERO);
        if base_to_sell <= Decimal::ZERO {
            return self.transition(
                ctx,
                ControllerState::Cooldown,
                now,
                IntentFlow::Stoploss,
                "stoploss_no_base",
                vec![],
            );
        }
        let Some(action) = self.action_factory.build_swap_action(
            SwapPurpose::Stoploss,
            now,
            TradeSide::Sell,
            base_to_sell,
            false,
            false,
        ) else {
            return self.stay(ctx, IntentFlow::Stoploss, "stoploss_swap_unavailable");
        };
        ctx.pending_swap_id = created_id(&action);
        ctx.pending_swap_since_ts = now;
        ctx.last_stoploss_swap_ts = now;
        ctx.stoploss_swap_attempts += 1;
        Decision::new(
            Intent::new(IntentFlow::Stoploss, IntentStage::SubmitSwap, "stoploss_swap"),
            vec![action],
        )
    }

    /// Post-close liquidation after STOPLOSS_STOP / TAKE_PROFIT_STOP. The
    /// wallet snapshot must postdate the close before the sell is sized, so
    /// a pre-close snapshot triggers a refresh even when nominally fresh.
    fn handle_exit_swap(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        let flow = self.exit_flow(ctx);

        let stale = !snapshot.balance_fresh || snapshot.balance_update_ts < ctx.state_since_ts;
        if stale {
            if ctx.exit_balance_refresh_attempts < self.config.max_exit_balance_refresh_attempts {
                let due = (now - ctx.last_exit_refresh_attempt_ts)
                    >= refresh_backoff(ctx.exit_balance_refresh_attempts);
                if ctx.exit_balance_refresh_attempts == 0 || due {
                    self.request_balance_refresh(ctx, now, "exit_refresh");
                    ctx.exit_balance_refresh_attempts += 1;
                    ctx.last_exit_refresh_attempt_ts = now;
                }
                return self.stay(ctx, flow, "exit_refresh_balance");
            }
            return self.stay(ctx, flow, "exit_wait_balance");
        }

        if self.resolve_pending_swap(snapshot, ctx, true) {
            return self.finish_exit(ctx, now, flow, "exit_swap_done");
        }
        if let Some(decision) = self.guard_pending_swap(snapshot, ctx, flow) {
            return decision;
        }
        if self.config.max_exit_swap_attempts > 0
            && ctx.exit_swap_attempts >= self.config.max_exit_swap_attempts
        {
            return self.finish_exit(ctx, now, flow, "exit_swap_failed");
        }
        if self.swap_cooldown_active(ctx.last_exit_swap_ts, now) {
            return self.stay(ctx, flow, "swap_cooldown");
        }
        if !snapshot.active_swaps.is_empty() {
            return self.stay(ctx, flow, "swap_in_progress");
        }

        let base_to_sell = snapshot.wallet_base - self.config.min_native_balance.max(Decimal::ZERO);
        if base_to_sell <= Decimal::ZERO {
            return self.finish_exit(ctx, now, flow, "exit_no_base");
        }
        let Some(action) = self.action_factory.build_swap_action(
            SwapPurpose::ExitLiquidation,
            now,
            TradeSide::Sell,
            base_to_sell,
            false,
            false,
        ) else {
            return self.stay(ctx, flow, "exit_swap_unavailable");
        };
        ctx.pending_swap_id = created_id(&action);
        ctx.pending_swap_since_ts = now;
        ctx.last_exit_swap_ts = now;
        ctx.exit_swap_attempts += 1;
        Decision::new(Intent::new(flow, IntentStage::SubmitSwap, "exit_swap"), vec![action])
    }

    fn handle_cooldown(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        if now < ctx.cooldown_until_ts {
            return self.stay(ctx, IntentFlow::None, "cooldown");
        }
        if ctx.pending_realized_anchor.is_some() {
            self.record_realized_on_close(snapshot, ctx, None);
        }
        self.transition(ctx, ControllerState::Idle, now, IntentFlow::None, "cooldown_complete", vec![])
    }

    // ---- entry / inventory planning -------------------------------------

    /// Wallet deltas from a side effect have not propagated yet: hold all
    /// new submissions behind the barrier.
    fn barrier_gate(&self, ctx: &mut ControllerContext, flow: IntentFlow) -> Option<Decision> {
        if ctx.balance_barrier.is_some() {
            return Some(self.stay(ctx, flow, "wait_balance_sync"));
        }
        None
    }

    fn plan_entry_open(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        if let Some(decision) = self.barrier_gate(ctx, IntentFlow::Entry) {
            return decision;
        }
        let proposal = match self.build_open_proposal(snapshot, ctx) {
            Ok(proposal) => proposal,
            Err(ProposalError::SwapRequired) => {
                return self.stay(ctx, IntentFlow::Entry, "swap_required")
            }
            Err(err) => {
                return self.transition(ctx, ControllerState::Idle, now, IntentFlow::Entry, err.to_string(), vec![])
            }
        };
        if proposal.needs_swap() {
            if !self.config.auto_swap_enabled {
                return self.stay(ctx, IntentFlow::Entry, "swap_required");
            }
            return self.transition(
                ctx,
                ControllerState::EntrySwap,
                now,
                IntentFlow::Entry,
                "swap_needed",
                vec![],
            );
        }
        let Some(action) = self
            .action_factory
            .build_open_lp_action(&self.policy, &proposal, now)
        else {
            return self.stay(ctx, IntentFlow::Entry, "budget_unavailable");
        };
        ctx.pending_open_lp_id = created_id(&action);
        self.transition(
            ctx,
            ControllerState::EntryOpen,
            now,
            IntentFlow::Entry,
            "entry_open",
            vec![action],
        )
    }

    fn build_open_proposal(
        &self,
        snapshot: &Snapshot,
        ctx: &ControllerContext,
    ) -> Result<OpenProposal, ProposalError> {
        self.planner.build(
            &self.policy,
            snapshot.current_price,
            snapshot.wallet_base,
            snapshot.wallet_quote,
            ctx.anchor_value_quote,
            Decimal::ZERO,
        )
    }

    /// Shared ENTRY_SWAP / REBALANCE_SWAP body: refresh gate, pending swap
    /// resolution, normalization pre-pass, then submit or fast-path onward.
    fn handle_inventory_swap_phase(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ControllerContext,
        phase: SwapPhase,
    ) -> Decision {
        let now = snapshot.now;
        let flow = phase.flow();

        if !snapshot.balance_fresh && ctx.inventory_balance_refresh_attempts < 1 {
            self.request_balance_refresh(ctx, now, "inventory_refresh");
            ctx.inventory_balance_refresh_attempts += 1;
            return self.stay(ctx, flow, format!("{}_refresh_balance", phase.prefix()));
        }
        if self.resolve_pending_swap(snapshot, ctx, false) {
            return self.transition(ctx, phase.next_state(), now, flow, "swap_done", vec![]);
        }
        if let Some(decision) = self.guard_pending_swap(snapshot, ctx, flow) {
            return decision;
        }
        if let Some(decision) = self.barrier_gate(ctx, flow) {
            return decision;
        }
        let proposal = match self.build_open_proposal(snapshot, ctx) {
            Ok(proposal) => proposal,
            Err(ProposalError::SwapRequired) => {
                // Deficit shrank under the minimum swap value: open directly
                return self.transition(ctx, phase.next_state(), now, flow, "swap_not_needed", vec![]);
            }
            Err(err) => {
                return self.transition(ctx, ControllerState::Idle, now, flow, err.to_string(), vec![])
            }
        };
        if let Some(decision) = self.maybe_normalize_inventory(snapshot, ctx, &proposal, &phase) {
            return decision;
        }
        if self.config.max_inventory_swap_attempts > 0
            && ctx.inventory_swap_attempts >= self.config.max_inventory_swap_attempts
        {
            return self.enter_cooldown(ctx, now, flow, "swap_attempts_exhausted", vec![]);
        }
        if self.swap_cooldown_active(ctx.last_inventory_swap_ts, now) {
            return self.stay(ctx, flow, "swap_cooldown");
        }
        if !snapshot.active_swaps.is_empty() {
            return self.stay(ctx, flow, "swap_in_progress");
        }
        if !proposal.needs_swap() {
            return self.transition(ctx, phase.next_state(), now, flow, "swap_not_needed", vec![]);
        }
        if !self.config.auto_swap_enabled {
            return self.stay(ctx, flow, "swap_required");
        }
        let Some(action) = self.action_factory.build_swap_action_for_delta(
            SwapPurpose::Inventory,
            now,
            snapshot.current_price,
            proposal.delta_base,
        ) else {
            return self.stay(ctx, flow, "swap_required");
        };
        ctx.pending_swap_id = created_id(&action);
        ctx.pending_swap_since_ts = now;
        ctx.last_inventory_swap_ts = now;
        ctx.inventory_swap_attempts += 1;
        Decision::new(
            Intent::new(flow, IntentStage::SubmitSwap, format!("{}_inventory_swap", phase.prefix())),
            vec![action],
        )
    }

    /// Drift correction between inventory retries: if wallet base has moved
    /// away from the proposal target by more than the tolerance, trade the
    /// excess back before the next open attempt.
    fn maybe_normalize_inventory(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ControllerContext,
        proposal: &OpenProposal,
        phase: &SwapPhase,
    ) -> Option<Decision> {
        let tolerance_pct = self.config.inventory_drift_tolerance_pct.max(Decimal::ZERO);
        if tolerance_pct <= Decimal::ZERO {
            return None;
        }
        let price = snapshot.price()?;
        let budget_value = proposal.target_base * price + proposal.target_quote;
        if budget_value <= Decimal::ZERO {
            return None;
        }
        let tolerance_base = (budget_value * tolerance_pct) / price;
        let base_diff = snapshot.wallet_base - proposal.target_base;
        if base_diff.abs() <= tolerance_base {
            return None;
        }
        let now = snapshot.now;
        let flow = phase.flow();
        if self.config.normalization_cooldown_sec > 0
            && ctx.last_normalization_swap_ts > 0.0
            && (now - ctx.last_normalization_swap_ts)
                < f64::from(self.config.normalization_cooldown_sec)
        {
            return Some(self.stay(ctx, flow, format!("{}_normalization_cooldown", phase.prefix())));
        }
        if self.config.max_inventory_swap_attempts > 0
            && ctx.normalization_swap_attempts >= self.config.max_inventory_swap_attempts
        {
            if self.config.normalization_strict {
                return Some(self.enter_cooldown(
                    ctx,
                    now,
                    flow,
                    format!("{}_normalization_exhausted", phase.prefix()),
                    vec![],
                ));
            }
            return None;
        }

        let required_adjust = base_diff.abs() - tolerance_base;
        if required_adjust <= Decimal::ZERO {
            return None;
        }
        let delta_base = if base_diff > Decimal::ZERO {
            -required_adjust
        } else {
            let max_buy = snapshot.wallet_quote / price;
            if max_buy <= Decimal::ZERO {
                if self.config.normalization_strict {
                    return Some(self.enter_cooldown(
                        ctx,
                        now,
                        flow,
                        format!("{}_normalization_no_quote", phase.prefix()),
                        vec![],
                    ));
                }
                return None;
            }
            if max_buy < required_adjust {
                if self.config.normalization_strict {
                    return Some(self.enter_cooldown(
                        ctx,
                        now,
                        flow,
                        format!("{}_normalization_insufficient", phase.prefix()),
                        vec![],
                    ));
                }
                max_buy
            } else {
                required_adjust
            }
        };
        if delta_base == Decimal::ZERO {
            return None;
        }
        let min_value = budget_value * self.config.normalization_min_value_pct.max(Decimal::ZERO);
        let delta_value = (delta_base * price).abs();
        if min_value > Decimal::ZERO && delta_value < min_value {
            return None;
        }

        let action = match self.action_factory.build_swap_action_for_delta(
            SwapPurpose::InventoryRebalance,
            now,
            Some(price),
            delta_base,
        ) {
            Some(action) => action,
            None => {
                if self.config.normalization_strict {
                    return Some(self.enter_cooldown(
                        ctx,
                        now,
                        flow,
                        format!("{}_normalization_unavailable", phase.prefix()),
                        vec![],
                    ));
                }
                return None;
            }
        };
        ctx.pending_swap_id = created_id(&action);
        ctx.pending_swap_since_ts = now;
        ctx.last_normalization_swap_ts = now;
        ctx.normalization_swap_attempts += 1;
        Some(Decision::new(
            Intent::new(
                flow,
                IntentStage::SubmitSwap,
                format!("{}_normalization_swap", phase.prefix()),
            ),
            vec![action],
        ))
    }

    // ---- stop-loss / manual / exits --------------------------------------

    fn maybe_stoploss(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ControllerContext,
        lp_view: Option<&LPView>,
        reason: &str,
    ) -> Option<Decision> {
        let price = snapshot.price()?;
        let equity = self.compute_risk_equity(snapshot, lp_view, price, ctx.anchor_value_quote)?;
        if ctx.anchor_value_quote.is_none() {
            let anchor = self.anchor_baseline(equity);
            if anchor > Decimal::ZERO {
                ctx.anchor_value_quote = Some(anchor);
                ctx.ledger.set_anchor(anchor);
            }
        }
        if !self
            .exit_policy
            .should_stoploss(ctx.anchor_value_quote, Some(equity))
        {
            return None;
        }
        let now = snapshot.now;
        ctx.last_exit_reason = Some("stop_loss".to_string());
        ctx.cooldown_until_ts = now + f64::from(self.config.stop_loss_pause_sec);
        if ctx.pending_realized_anchor.is_none() {
            ctx.pending_realized_anchor = ctx.anchor_value_quote;
        }
        match lp_view {
            Some(lp) if !lp.is_closed() => {
                ctx.pending_open_lp_id = None;
                ctx.pending_close_lp_id = Some(lp.executor_id.clone());
                let stop = Action::stop(&self.config.id, &lp.executor_id);
                Some(self.transition(ctx, ControllerState::StoplossStop, now, IntentFlow::Stoploss, reason, vec![stop]))
            }
            _ => Some(self.transition(
                ctx,
                ControllerState::StoplossSwap,
                now,
                IntentFlow::Stoploss,
                reason,
                vec![],
            )),
        }
    }

    fn force_manual_stop(&self, snapshot: &Snapshot, ctx: &mut ControllerContext) -> Decision {
        let now = snapshot.now;
        ctx.last_exit_reason = Some("manual_stop".to_string());
        if ctx.pending_realized_anchor.is_none() {
            ctx.pending_realized_anchor = ctx.anchor_value_quote;
        }
        ctx.cooldown_until_ts = 0.0;
        ctx.pending_open_lp_id = None;

        let lp_view = self.select_lp(snapshot, ctx);
        let mut actions: Vec<Action> = snapshot
            .active_swaps
            .iter()
            .map(|swap| Action::stop(&self.config.id, &swap.executor_id))
            .collect();

        match &lp_view {
            Some(lp) if lp.is_open() => {
                ctx.pending_close_lp_id = Some(lp.executor_id.clone());
                ctx.anchor_value_quote = None;
                ctx.ledger.clear_anchor();
                actions.insert(0, Action::stop(&self.config.id, &lp.executor_id));
                self.transition(ctx, ControllerState::StoplossStop, now, IntentFlow::Manual, "manual_stop", actions)
            }
            _ => {
                self.record_realized_on_close(snapshot, ctx, lp_view.as_ref());
                ctx.pending_close_lp_id = None;
                ctx.anchor_value_quote = None;
                ctx.ledger.clear_anchor();
                if actions.is_empty() && snapshot.wallet_base <= Decimal::ZERO {
                    return self.transition(ctx, ControllerState::Idle, now, IntentFlow::Manual, "manual_stop_complete", vec![]);
                }
                self.transition(ctx, ControllerState::StoplossSwap, now, IntentFlow::Manual, "manual_stop", actions)
            }
        }
    }

    fn exit_flow(&self, ctx: &ControllerContext) -> IntentFlow {
        match ctx.last_exit_reason.as_deref() {
            Some("take_profit") => IntentFlow::TakeProfit,
            Some("manual_stop") => IntentFlow::Manual,
            _ => IntentFlow::Stoploss,
        }
    }

    /// Leave EXIT_SWAP: take-profit goes straight back to idle, stop-loss and
    /// manual exits honor the pause set at trigger time.
    fn finish_exit(
        &self,
        ctx: &mut ControllerContext,
        now: f64,
        flow: IntentFlow,
        reason: &str,
    ) -> Decision {
        if matches!(flow, IntentFlow::TakeProfit) {
            return self.transition(ctx, ControllerState::Idle, now, flow, reason, vec![]);
        }
        self.transition(ctx, ControllerState::Cooldown, now, flow, reason, vec![])
    }

    // ---- pending swap plumbing -------------------------------------------

    /// Resolve the pending swap against the snapshot (or a recent completed
    /// swap of the right purpose after the grace window). On completion the
    /// per-concern attempt counters reset and a refresh is requested.
    fn resolve_pending_swap(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ControllerContext,
        is_exit: bool,
    ) -> bool {
        let Some(pending_id) = ctx.pending_swap_id.clone() else {
            return false;
        };
        let swap = snapshot
            .swaps
            .get(&pending_id)
            .cloned()
            .or_else(|| self.find_recent_completed_swap(snapshot, ctx, is_exit));
        let Some(swap) = swap else {
            return false;
        };
        if !swap.is_done {
            return false;
        }
        ctx.pending_swap_id = None;
        ctx.pending_swap_since_ts = 0.0;
        if !swap.completed() {
            return false;
        }
        if is_exit {
            ctx.stoploss_swap_attempts = 0;
            ctx.stoploss_balance_refresh_attempts = 0;
            ctx.exit_swap_attempts = 0;
            ctx.exit_balance_refresh_attempts = 0;
        } else if swap.purpose == Some(SwapPurpose::InventoryRebalance) {
            ctx.normalization_swap_attempts = 0;
        } else {
            ctx.inventory_swap_attempts = 0;
            ctx.inventory_balance_refresh_attempts = 0;
            let lp_view = self.select_lp(snapshot, ctx);
            self.set_anchor_if_ready(snapshot, ctx, lp_view.as_ref());
        }
        self.request_balance_refresh(ctx, snapshot.now, "swap_done");
        true
    }

    /// While within grace, a pending swap missing from the snapshot is
    /// assumed in flight; afterwards the id is dropped and the phase retries.
    fn guard_pending_swap(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ControllerContext,
        flow: IntentFlow,
    ) -> Option<Decision> {
        let pending_id = ctx.pending_swap_id.clone()?;
        if let Some(swap) = snapshot.swaps.get(&pending_id) {
            if !swap.is_done {
                return Some(self.stay(ctx, flow, "swap_pending"));
            }
        }
        if ctx.pending_swap_since_ts <= 0.0
            || (snapshot.now - ctx.pending_swap_since_ts) < PENDING_SWAP_GRACE_SEC
        {
            return Some(self.stay(ctx, flow, "swap_pending"));
        }
        ctx.pending_swap_id = None;
        ctx.pending_swap_since_ts = 0.0;
        None
    }

    fn find_recent_completed_swap(
        &self,
        snapshot: &Snapshot,
        ctx: &ControllerContext,
        is_exit: bool,
    ) -> Option<SwapView> {
        if ctx.pending_swap_since_ts <= 0.0 {
            return None;
        }
        snapshot
            .swaps
            .values()
            .filter(|swap| {
                let purpose_matches = match swap.purpose {
                    Some(SwapPurpose::ExitLiquidation) | Some(SwapPurpose::Stoploss) => is_exit,
                    Some(SwapPurpose::Inventory) | Some(SwapPurpose::InventoryRebalance) => !is_exit,
                    None => false,
                };
                purpose_matches && swap.is_done && swap.timestamp >= ctx.pending_swap_since_ts
            })
            .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
            .cloned()
    }

    // ---- shared helpers --------------------------------------------------

    fn select_lp(&self, snapshot: &Snapshot, ctx: &ControllerContext) -> Option<LPView> {
        if let Some(id) = &ctx.pending_open_lp_id {
            if let Some(lp) = snapshot.lp.get(id) {
                return Some(lp.clone());
            }
        }
        if let Some(id) = &ctx.pending_close_lp_id {
            if let Some(lp) = snapshot.lp.get(id) {
                return Some(lp.clone());
            }
        }
        if let Some(lp) = snapshot
            .active_lp
            .iter()
            .min_by(|a, b| a.executor_id.cmp(&b.executor_id))
        {
            return Some(lp.clone());
        }
        snapshot.lp.values().next().cloned()
    }

    fn is_entry_triggered(&self, current_price: Option<Decimal>) -> bool {
        if self.config.target_price <= Decimal::ZERO {
            return true;
        }
        let Some(price) = current_price else {
            return false;
        };
        if self.config.trigger_above {
            price >= self.config.target_price
        } else {
            price <= self.config.target_price
        }
    }

    fn can_reenter(&self, ctx: &ControllerContext) -> bool {
        if self.config.reenter_enabled {
            return true;
        }
        ctx.last_exit_reason.as_deref() != Some("stop_loss")
    }

    fn open_timeout_exceeded(&self, ctx: &ControllerContext, now: f64) -> bool {
        let timeout = f64::from(self.config.open_timeout_sec);
        if timeout <= 0.0 || ctx.state_since_ts <= 0.0 {
            return false;
        }
        (now - ctx.state_since_ts) >= timeout
    }

    fn swap_cooldown_active(&self, last_swap_ts: f64, now: f64) -> bool {
        if self.config.cooldown_seconds == 0 || last_swap_ts <= 0.0 {
            return false;
        }
        (now - last_swap_ts) < f64::from(self.config.cooldown_seconds)
    }

    fn set_anchor_if_ready(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ControllerContext,
        lp_view: Option<&LPView>,
    ) {
        if ctx.anchor_value_quote.is_some() {
            return;
        }
        let Some(price) = snapshot.price() else {
            return;
        };
        let Some(equity) = self.compute_risk_equity(snapshot, lp_view, price, None) else {
            return;
        };
        if equity <= Decimal::ZERO {
            return;
        }
        let anchor = self.anchor_baseline(equity);
        ctx.anchor_value_quote = Some(anchor);
        ctx.ledger.set_anchor(anchor);
        info!(anchor = %anchor, "anchor fixed");
    }

    fn anchor_baseline(&self, equity: Decimal) -> Decimal {
        let cap = self.config.position_value_quote.max(Decimal::ZERO);
        if cap <= Decimal::ZERO {
            equity
        } else {
            equity.min(cap)
        }
    }

    /// Equity for risk decisions: LP value plus wallet value capped at the
    /// budget headroom, so funds beyond the budget neither mask LP losses
    /// nor inflate take-profit.
    fn compute_risk_equity(
        &self,
        snapshot: &Snapshot,
        lp_view: Option<&LPView>,
        price: Decimal,
        anchor_value_quote: Option<Decimal>,
    ) -> Option<Decimal> {
        if price <= Decimal::ZERO {
            return None;
        }
        let wallet_value = snapshot.wallet_base * price + snapshot.wallet_quote;
        let lp_value = lp_view
            .map(|lp| lp.value_with_fees(price))
            .unwrap_or(Decimal::ZERO);
        let cap = anchor_value_quote
            .filter(|a| *a > Decimal::ZERO)
            .unwrap_or_else(|| self.config.position_value_quote.max(Decimal::ZERO));
        if cap <= Decimal::ZERO {
            return Some(lp_value + wallet_value);
        }
        let budget_wallet = (cap - lp_value).max(Decimal::ZERO);
        Some(lp_value + wallet_value.min(budget_wallet))
    }

    /// Fold the anchor captured at close-request time into the realized
    /// totals once the close confirms.
    fn record_realized_on_close(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ControllerContext,
        lp_view: Option<&LPView>,
    ) {
        let anchor = ctx
            .anchor_value_quote
            .or(ctx.pending_realized_anchor)
            .filter(|a| *a > Decimal::ZERO);
        let Some(anchor) = anchor else {
            return;
        };
        let Some(price) = snapshot.price() else {
            return;
        };
        let Some(equity) = self.compute_risk_equity(snapshot, lp_view, price, Some(anchor)) else {
            return;
        };
        ctx.realized_pnl_quote += equity - anchor;
        ctx.realized_volume_quote += anchor;
        ctx.pending_realized_anchor = None;
        self.request_balance_refresh(ctx, snapshot.now, "lp_closed");
        info!(
            realized_pnl = %ctx.realized_pnl_quote,
            realized_volume = %ctx.realized_volume_quote,
            "realized recorded on close"
        );
    }

    fn update_out_of_range_timer(&self, ctx: &mut ControllerContext, lp_view: &LPView) {
        match lp_view.state {
            Some(LpState::InRange) => ctx.out_of_range_since = None,
            Some(LpState::OutOfRange) => {
                // Executor-reported timestamp wins; otherwise the engine's
                // own monitoring tick seeds the timer
                if let Some(since) = lp_view.out_of_range_since {
                    ctx.out_of_range_since = Some(since);
                }
            }
            _ => {}
        }
    }

    /// Hint the external balance manager to refresh until the ttl passes
    fn request_balance_refresh(&self, ctx: &mut ControllerContext, now: f64, reason: &str) {
        let ttl = f64::from(self.config.balance_refresh_timeout_sec.max(2));
        let deadline = now + ttl;
        if deadline > ctx.force_balance_refresh_until_ts {
            ctx.force_balance_refresh_until_ts = deadline;
            ctx.force_balance_refresh_reason = Some(reason.to_string());
        }
    }

    // ---- transitions -----------------------------------------------------

    fn enter_cooldown(
        &self,
        ctx: &mut ControllerContext,
        now: f64,
        flow: IntentFlow,
        reason: impl Into<String>,
        actions: Vec<Action>,
    ) -> Decision {
        if self.config.cooldown_seconds == 0 {
            return self.transition(ctx, ControllerState::Idle, now, flow, reason, actions);
        }
        ctx.cooldown_until_ts = now + f64::from(self.config.cooldown_seconds);
        self.transition(ctx, ControllerState::Cooldown, now, flow, reason, actions)
    }

    fn transition(
        &self,
        ctx: &mut ControllerContext,
        next_state: ControllerState,
        now: f64,
        flow: IntentFlow,
        reason: impl Into<String>,
        actions: Vec<Action>,
    ) -> Decision {
        let reason = reason.into();
        if ctx.state != next_state {
            debug!(from = ?ctx.state, to = ?next_state, reason = %reason, "transition");
            ctx.state = next_state;
            ctx.state_since_ts = now;
            if matches!(next_state, ControllerState::Idle | ControllerState::Cooldown) {
                ctx.clear_transients();
            }
        }
        let stage = if actions.is_empty() {
            IntentStage::Wait
        } else {
            stage_for_actions(&actions)
        };
        Decision::new(Intent::new(flow, stage, reason), actions)
    }

    fn stay(
        &self,
        ctx: &mut ControllerContext,
        flow: IntentFlow,
        reason: impl Into<String>,
    ) -> Decision {
        let reason = reason.into();
        ctx.last_decision_reason = Some(reason.clone());
        Decision::wait(flow, reason)
    }
}

fn stage_for_actions(actions: &[Action]) -> IntentStage {
    match actions.first() {
        Some(Action::CreateLp(_)) => IntentStage::SubmitLp,
        Some(Action::CreateSwap(_)) => IntentStage::SubmitSwap,
        Some(Action::Stop { .. }) => IntentStage::StopLp,
        None => IntentStage::Wait,
    }
}

fn created_id(action: &Action) -> Option<String> {
    match action {
        Action::CreateLp(config) => Some(config.id.clone()),
        Action::CreateSwap(config) => Some(config.id.clone()),
        Action::Stop { .. } => None,
    }
}

fn select_swap_to_keep(active_swaps: &[SwapView]) -> Option<&SwapView> {
    if active_swaps.is_empty() {
        return None;
    }
    active_swaps.iter().max_by(|a, b| {
        let pa = a.purpose.map(|p| p.precedence()).unwrap_or(0);
        let pb = b.purpose.map(|p| p.precedence()).unwrap_or(0);
        pa.cmp(&pb)
            .then_with(|| b.executor_id.cmp(&a.executor_id))
    })
}
