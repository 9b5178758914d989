//! Entry strategy: candidate selection, triggering and pre-buy safety math
//!
//! - `types`: shared domain types
//! - `trigger`: observation + momentum trigger
//! - `selector`: sticky candidate ranking with prefetch
//! - `edge`: round-trip honeypot filter and fee treatment
//! - `liquidity`: liquidity / price-impact preflight
//! - `profit_target`: decaying profit target and fade tracking

pub mod edge;
pub mod liquidity;
pub mod profit_target;
pub mod selector;
pub mod trigger;
pub mod types;

pub use edge::{net_of_fees, EdgeEstimator, NetProceeds, RoundTripEdge};
pub use liquidity::{LiquidityCheck, LiquidityPreflight};
pub use profit_target::{profit_target, FadeTracker};
pub use selector::{CandidateSelector, Pick};
pub use trigger::{TriggerEvaluator, TriggerVerdict, WaitReason};
pub use types::*;
