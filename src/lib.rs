//! CLMM LP Bot Library
//!
//! Decision core for an automated liquidity-provision agent on
//! concentrated-liquidity pools (Uniswap v3, Meteora DLMM).
//! Consumes per-tick snapshots of pool/wallet/executor state and emits
//! executor actions; all chain I/O lives in external executors.

pub mod adapter;
pub mod barrier;
pub mod config;
pub mod controller;
pub mod cost_filter;
pub mod exit_policy;
pub mod ledger;
pub mod math;
pub mod planner;
pub mod policy;
pub mod rebalance;
pub mod replay;
pub mod types;

// Re-export commonly used types
pub use adapter::PoolDomainAdapter;
pub use config::{load_config, ControllerConfig};
pub use controller::{Controller, ControllerContext, ControllerState};
pub use planner::{OpenPlanner, OpenProposal};
pub use policy::PoolPolicy;
pub use types::{Action, Decision, Intent, IntentFlow, IntentStage, LPView, Snapshot, SwapView};
