//! Market signal history

pub mod history;

pub use history::{slope_per_minute, SignalHistory};
