//! Open planner: turns (price, wallet, anchor) into a concrete proposal for
//! the next LP position - the range, the target base/quote split, the amounts
//! actually deployable from the wallet, and the inventory swap (if any) that
//! has to run first.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::math::V3Math;
use crate::policy::PoolPolicy;

/// Why a proposal could not be built. The Display strings are the stable
/// decision reasons surfaced in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("price_unavailable")]
    PriceUnavailable,
    #[error("budget_unavailable")]
    BudgetUnavailable,
    #[error("budget_depleted")]
    BudgetDepleted,
    #[error("range_unavailable")]
    RangeUnavailable,
    #[error("ratio_unavailable")]
    RatioUnavailable,
    #[error("target_unavailable")]
    TargetUnavailable,
    #[error("insufficient_balance")]
    InsufficientBalance,
    #[error("swap_required")]
    SwapRequired,
}

/// A fully computed open plan.
/// `delta_base > 0` means BUY base with quote before opening; `< 0` means
/// SELL base to quote. A delta below `min_swap_value_quote` is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenProposal {
    pub lower: Decimal,
    pub upper: Decimal,
    pub target_base: Decimal,
    pub target_quote: Decimal,
    pub delta_base: Decimal,
    pub delta_quote_value: Decimal,
    pub open_base: Decimal,
    pub open_quote: Decimal,
    pub min_swap_value_quote: Decimal,
}

impl OpenProposal {
    /// An inventory swap must run before the open
    pub fn needs_swap(&self) -> bool {
        self.delta_quote_value > Decimal::ZERO && self.delta_quote_value >= self.min_swap_value_quote
    }
}

pub struct OpenPlanner {
    /// Configured capital cap in quote
    position_value_quote: Decimal,
    /// Quote held back for fees/costs
    fixed_reserve_quote: Decimal,
    swap_min_value_pct: Decimal,
    auto_swap_enabled: bool,
}

impl OpenPlanner {
    pub fn new(
        position_value_quote: Decimal,
        fixed_reserve_quote: Decimal,
        swap_min_value_pct: Decimal,
        auto_swap_enabled: bool,
    ) -> Self {
        Self {
            position_value_quote: position_value_quote.max(Decimal::ZERO),
            fixed_reserve_quote: fixed_reserve_quote.max(Decimal::ZERO),
            swap_min_value_pct: swap_min_value_pct.max(Decimal::ZERO),
            auto_swap_enabled,
        }
    }

    /// Build the proposal for opening at `current_price` with the given wallet.
    /// `anchor_value_quote` tightens the budget once fixed; `deployed_value`
    /// reserves budget already sitting in live positions.
    pub fn build(
        &self,
        policy: &PoolPolicy,
        current_price: Option<Decimal>,
        wallet_base: Decimal,
        wallet_quote: Decimal,
        anchor_value_quote: Option<Decimal>,
        deployed_value: Decimal,
    ) -> Result<OpenProposal, ProposalError> {
        let price = current_price
            .filter(|p| *p > Decimal::ZERO)
            .ok_or(ProposalError::PriceUnavailable)?;

        if self.position_value_quote <= Decimal::ZERO {
            return Err(ProposalError::BudgetUnavailable);
        }
        let budget_cap = match anchor_value_quote.filter(|a| *a > Decimal::ZERO) {
            Some(anchor) => self.position_value_quote.min(anchor),
            None => self.position_value_quote,
        };
        let remaining = (budget_cap - deployed_value.max(Decimal::ZERO)).max(Decimal::ZERO);
        if remaining <= Decimal::ZERO {
            return Err(ProposalError::BudgetDepleted);
        }

        let range_plan = policy
            .range_plan(price)
            .ok_or(ProposalError::RangeUnavailable)?;
        let ratio = policy
            .quote_per_base_ratio(price, range_plan.lower, range_plan.upper)
            .ok_or(ProposalError::RatioUnavailable)?;

        let wallet_value = wallet_base * price + wallet_quote;
        let mut effective_budget = remaining.min(wallet_value);
        if self.fixed_reserve_quote > Decimal::ZERO {
            effective_budget = (effective_budget - self.fixed_reserve_quote).max(Decimal::ZERO);
        }
        if effective_budget <= Decimal::ZERO {
            return Err(ProposalError::InsufficientBalance);
        }

        let (target_base, target_quote) =
            V3Math::target_amounts_from_value(effective_budget, price, ratio)
                .ok_or(ProposalError::TargetUnavailable)?;

        let open_base = wallet_base.min(target_base);
        let open_quote = wallet_quote.min(target_quote);
        if open_base <= Decimal::ZERO && open_quote <= Decimal::ZERO {
            return Err(ProposalError::InsufficientBalance);
        }

        let base_deficit = (target_base - wallet_base).max(Decimal::ZERO);
        let quote_deficit = (target_quote - wallet_quote).max(Decimal::ZERO);
        if base_deficit > Decimal::ZERO && quote_deficit > Decimal::ZERO {
            return Err(ProposalError::InsufficientBalance);
        }

        let mut delta_base = Decimal::ZERO;
        if base_deficit > Decimal::ZERO {
            let quote_surplus = (wallet_quote - target_quote).max(Decimal::ZERO);
            if quote_surplus <= Decimal::ZERO {
                return Err(ProposalError::InsufficientBalance);
            }
            delta_base = base_deficit.min(quote_surplus / price);
        } else if quote_deficit > Decimal::ZERO {
            let base_surplus = (wallet_base - target_base).max(Decimal::ZERO);
            if base_surplus <= Decimal::ZERO {
                return Err(ProposalError::InsufficientBalance);
            }
            delta_base = -base_surplus.min(quote_deficit / price);
        }

        let min_swap_value = effective_budget * self.swap_min_value_pct;
        let delta_quote_value = (delta_base * price).abs();

        // One-sided wallet: the open cannot happen without the swap
        if open_base <= Decimal::ZERO || open_quote <= Decimal::ZERO {
            if !self.auto_swap_enabled {
                return Err(ProposalError::SwapRequired);
            }
            if delta_quote_value <= Decimal::ZERO || delta_quote_value < min_swap_value {
                return Err(ProposalError::SwapRequired);
            }
        }

        Ok(OpenProposal {
            lower: range_plan.lower,
            upper: range_plan.upper,
            target_base,
            target_quote,
            delta_base,
            delta_quote_value,
            open_base,
            open_quote,
            min_swap_value_quote: min_swap_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PoolDomainAdapter;
    use crate::config::tests::test_config;
    use crate::config::PoolVenue;
    use rust_decimal_macros::dec;

    fn meteora_policy() -> PoolPolicy {
        let mut config = test_config();
        config.venue = PoolVenue::Meteora;
        let domain = PoolDomainAdapter::from_pairs("SOL-USDC", None);
        PoolPolicy::from_config(&config, domain)
    }

    fn planner() -> OpenPlanner {
        OpenPlanner::new(dec!(200), dec!(0), dec!(0.005), true)
    }

    #[test]
    fn test_missing_price_rejected() {
        let err = planner()
            .build(&meteora_policy(), None, dec!(0), dec!(1000), None, dec!(0))
            .unwrap_err();
        assert_eq!(err, ProposalError::PriceUnavailable);
        assert_eq!(err.to_string(), "price_unavailable");
    }

    #[test]
    fn test_zero_budget_rejected() {
        let planner = OpenPlanner::new(dec!(0), dec!(0), dec!(0.005), true);
        let err = planner
            .build(&meteora_policy(), Some(dec!(20)), dec!(0), dec!(1000), None, dec!(0))
            .unwrap_err();
        assert_eq!(err, ProposalError::BudgetUnavailable);
    }

    #[test]
    fn test_deployed_value_depletes_budget() {
        let err = planner()
            .build(
                &meteora_policy(),
                Some(dec!(20)),
                dec!(0),
                dec!(1000),
                None,
                dec!(200),
            )
            .unwrap_err();
        assert_eq!(err, ProposalError::BudgetDepleted);
    }

    #[test]
    fn test_quote_only_wallet_needs_buy_swap() {
        // price=20, wallet=(0, 1000), budget=200
        let proposal = planner()
            .build(&meteora_policy(), Some(dec!(20)), dec!(0), dec!(1000), None, dec!(0))
            .unwrap();
        assert!(proposal.delta_base > Decimal::ZERO, "must buy base");
        assert!(proposal.needs_swap());
        assert_eq!(proposal.open_base, dec!(0));
        assert!(proposal.open_quote > Decimal::ZERO);
        // Budget respected: targets value out of 200, not 1000
        let target_value = proposal.target_base * dec!(20) + proposal.target_quote;
        assert_eq!(target_value, dec!(200));
    }

    #[test]
    fn test_base_only_wallet_needs_sell_swap() {
        let proposal = planner()
            .build(&meteora_policy(), Some(dec!(20)), dec!(50), dec!(0), None, dec!(0))
            .unwrap();
        assert!(proposal.delta_base < Decimal::ZERO, "must sell base");
        assert!(proposal.needs_swap());
    }

    #[test]
    fn test_balanced_wallet_no_swap() {
        // Build targets first, then hand the planner exactly those amounts
        let policy = meteora_policy();
        let probe = planner()
            .build(&policy, Some(dec!(20)), dec!(0), dec!(1000), None, dec!(0))
            .unwrap();
        let proposal = planner()
            .build(
                &policy,
                Some(dec!(20)),
                probe.target_base,
                probe.target_quote,
                None,
                dec!(0),
            )
            .unwrap();
        assert!(!proposal.needs_swap());
        assert_eq!(proposal.open_base, proposal.target_base);
        assert_eq!(proposal.open_quote, proposal.target_quote);
    }

    #[test]
    fn test_anchor_tightens_budget() {
        let proposal = planner()
            .build(
                &meteora_policy(),
                Some(dec!(20)),
                dec!(0),
                dec!(1000),
                Some(dec!(150)),
                dec!(0),
            )
            .unwrap();
        let target_value = proposal.target_base * dec!(20) + proposal.target_quote;
        assert_eq!(target_value, dec!(150));
    }

    #[test]
    fn test_fixed_reserve_shrinks_budget() {
        let planner = OpenPlanner::new(dec!(200), dec!(10), dec!(0.005), true);
        let proposal = planner
            .build(&meteora_policy(), Some(dec!(20)), dec!(0), dec!(1000), None, dec!(0))
            .unwrap();
        let target_value = proposal.target_base * dec!(20) + proposal.target_quote;
        assert_eq!(target_value, dec!(190));
    }

    #[test]
    fn test_auto_swap_disabled_surfaces_swap_required() {
        let planner = OpenPlanner::new(dec!(200), dec!(0), dec!(0.005), false);
        let err = planner
            .build(&meteora_policy(), Some(dec!(20)), dec!(0), dec!(1000), None, dec!(0))
            .unwrap_err();
        assert_eq!(err, ProposalError::SwapRequired);
    }

    #[test]
    fn test_empty_wallet_insufficient() {
        let err = planner()
            .build(&meteora_policy(), Some(dec!(20)), dec!(0), dec!(0), None, dec!(0))
            .unwrap_err();
        assert_eq!(err, ProposalError::InsufficientBalance);
    }

    #[test]
    fn test_wallet_above_targets_needs_no_swap() {
        // Wallet covers both targets with a little spare: no deficit on
        // either side, so the proposal carries a zero delta.
        let policy = meteora_policy();
        let probe = planner()
            .build(&policy, Some(dec!(20)), dec!(0), dec!(1000), None, dec!(0))
            .unwrap();
        let proposal = planner()
            .build(
                &policy,
                Some(dec!(20)),
                probe.target_base + dec!(0.00001),
                probe.target_quote + dec!(0.0001),
                None,
                dec!(0),
            )
            .unwrap();
        assert!(!proposal.needs_swap());
    }
}
