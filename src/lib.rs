//! Sniper Engine Library
//!
//! Single-position momentum sniper: observe a candidate, buy when the trigger
//! fires and the round trip is safe, then manage the holding through a
//! layered sell policy pipeline until it exits.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod persist;
pub mod pipeline;
pub mod position;
pub mod registry;
pub mod services;
pub mod signals;
pub mod strategy;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Engine, EngineStatus};
pub use error::{Error, Result};
