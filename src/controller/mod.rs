//! Tick-driven decision controller for one pool: context, action factory and
//! the finite state machine. The controller is synchronous; external
//! executors and the balance/price feeds run elsewhere and surface through
//! the snapshot.

pub mod actions;
pub mod context;
pub mod fsm;

pub use actions::ActionFactory;
pub use context::{ControllerContext, ControllerState};
pub use fsm::Controller;
