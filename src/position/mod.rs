//! Position lifecycle
//!
//! - `manager`: the single position record and its state machine
//! - `reconciler`: pending-credit watchdog confirming buys

pub mod manager;
pub mod reconciler;

pub use manager::{Phase, Position, PositionManager, TickState, WarmingHold};
pub use reconciler::{CreditOutcome, CreditReconciler, PendingCredit};
