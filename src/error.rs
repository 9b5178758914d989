//! Error types for the sniper engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure class used to pick a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout, rate limit, temporary no-route: retry with backoff
    Transient,
    /// No route, below minimum, insufficient balance: abandon + blacklist
    Structural,
    /// Edge estimator or risk gate refused: no retry
    Safety,
    /// Credit not yet observed: reconciler's job
    Settlement,
    /// Everything else (config, persistence, programming errors)
    Fatal,
}

/// Main error type for the sniper engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // Transient upstream errors
    #[error("{op} timed out after {ms}ms")]
    Timeout { op: &'static str, ms: u64 },

    #[error("Upstream rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("No route right now: {0}")]
    TemporaryNoRoute(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    // Structural rejections
    #[error("No route for {input} -> {output}")]
    NoRoute { input: String, output: String },

    #[error("Trade below minimum notional: {amount} < {minimum}")]
    BelowMinimum { amount: f64, minimum: f64 },

    #[error("Insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: f64, required: f64 },

    // Safety rejections
    #[error("Round trip failed for {mint}: {reason}")]
    Honeypot { mint: String, reason: String },

    #[error("Risk severity {severity:.2} above limit {limit:.2} for {mint}")]
    RiskTooHigh {
        mint: String,
        severity: f64,
        limit: f64,
    },

    #[error("Asset {mint} is banned: {reason}")]
    Banned { mint: String, reason: String },

    #[error("Liquidity check failed for {mint}: {reason}")]
    LiquidityTooThin { mint: String, reason: String },

    #[error("Round trip edge {edge_pct:.2}% below limit {limit_pct:.2}% for {mint}")]
    EdgeTooThin {
        mint: String,
        edge_pct: f64,
        limit_pct: f64,
    },

    // Settlement
    #[error("Credit for {0} not yet observed")]
    CreditPending(String),

    // State machine / coordination
    #[error("A position is already open in {0}")]
    PositionExists(String),

    #[error("No open position")]
    NoPosition,

    #[error("Invalid transition from {from} via {via}")]
    InvalidTransition { from: String, via: &'static str },

    #[error("Asset {0} is locked")]
    Locked(String),

    #[error("Buy lock held")]
    BuyLockHeld,

    #[error("Router cooling down for another {0}ms")]
    RouterCooldown(u64),

    #[error("Run generation {0} is stale")]
    StaleGeneration(u64),

    // Persistence / serialization / IO
    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Classify this error for the recovery policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Timeout { .. }
            | Error::RateLimited(_)
            | Error::Upstream(_)
            | Error::TemporaryNoRoute(_)
            | Error::Rpc(_)
            | Error::Locked(_)
            | Error::BuyLockHeld
            | Error::RouterCooldown(_) => ErrorClass::Transient,

            Error::NoRoute { .. }
            | Error::BelowMinimum { .. }
            | Error::InsufficientBalance { .. }
            | Error::Transaction(_) => ErrorClass::Structural,

            Error::Honeypot { .. }
            | Error::RiskTooHigh { .. }
            | Error::Banned { .. }
            | Error::LiquidityTooThin { .. }
            | Error::EdgeTooThin { .. } => ErrorClass::Safety,

            Error::CreditPending(_) => ErrorClass::Settlement,

            _ => ErrorClass::Fatal,
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// True when upstream is signalling load and callers should back off harder
    pub fn is_stress(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::Timeout { .. })
    }

    /// Check if this error should put the asset on the blacklist
    pub fn blacklists_asset(&self) -> bool {
        matches!(self.class(), ErrorClass::Structural | ErrorClass::Safety)
            && !matches!(self, Error::Banned { .. })
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        let msg = e.to_string();
        if msg.contains("429") || msg.to_lowercase().contains("too many requests") {
            Error::RateLimited(msg)
        } else {
            Error::Rpc(msg)
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout {
                op: "http",
                ms: 0,
            }
        } else if e.status().map(|s| s.as_u16() == 429).unwrap_or(false) {
            Error::RateLimited(e.to_string())
        } else {
            Error::Upstream(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
