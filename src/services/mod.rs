//! External collaborators
//!
//! The engine consumes market signals, quotes, swaps and ledger reads only
//! through these traits so every decision path runs against scripted mocks in
//! tests and against the live adapters in production.

pub mod dexscreener;
pub mod jupiter;
#[cfg(test)]
pub mod mock;
pub mod paper;
pub mod pumpportal;
pub mod risk;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::strategy::{PanelSnapshot, RugSignal};

pub use dexscreener::DexScreenerPanel;
pub use jupiter::JupiterQuotes;
pub use paper::PaperBook;
pub use pumpportal::PumpPortalSwap;
pub use risk::PanelRiskClassifier;
pub use rpc::RpcLedger;

/// Signal panel lookup plus discovery feeds
#[async_trait]
pub trait SignalPanel: Send + Sync {
    /// Current panel row for one asset
    async fn focus(&self, mint: &str) -> Result<PanelSnapshot>;

    /// Currently visible / discoverable assets, best first
    async fn discover(&self, limit: usize) -> Result<Vec<String>>;

    /// Externally designated leader asset, if any
    async fn leader(&self) -> Result<Option<String>>;

    /// Whether the external momentum-mode indicator is on
    async fn momentum_mode(&self) -> Result<bool>;
}

/// Hazard classification
#[async_trait]
pub trait RiskClassifier: Send + Sync {
    async fn risk_signal(&self, mint: &str) -> Result<RugSignal>;
}

/// A single quote result in raw base units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub in_amount: u64,
    pub out_amount: u64,
    /// Router-reported price impact, percent (0 when unknown)
    pub price_impact_pct: f64,
}

/// Black-box quoting function
#[async_trait]
pub trait QuoteService: Send + Sync {
    /// Quote `amount` raw units of `input` into `output`
    async fn quote(&self, input: &str, output: &str, amount: u64, slippage_bps: u16)
        -> Result<Quote>;
}

/// Trade submission. The signer lives inside the implementation.
#[async_trait]
pub trait SwapService: Send + Sync {
    /// Submit a swap of `amount_ui` of `input` into `output`, returning the tx reference
    async fn swap(&self, input: &str, output: &str, amount_ui: f64, slippage_bps: u16)
        -> Result<String>;
}

/// Token balance of one owner
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenBalance {
    pub quantity: f64,
    pub decimals: u8,
}

/// One post-trade token balance from a settled transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostBalance {
    pub owner: String,
    pub mint: String,
    pub quantity: f64,
    pub decimals: u8,
}

/// Settled transaction details
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TxDetails {
    pub succeeded: bool,
    pub post_balances: Vec<PostBalance>,
}

impl TxDetails {
    /// Post-trade balance of `mint` held by `owner`
    pub fn post_balance(&self, owner: &str, mint: &str) -> Option<&PostBalance> {
        self.post_balances
            .iter()
            .find(|b| b.owner == owner && b.mint == mint)
    }
}

/// Ledger / balance reads and account housekeeping
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Balance of the owner's associated token account
    async fn balance(&self, owner: &str, mint: &str) -> Result<TokenBalance>;

    /// Sum over every token account of `owner` for `mint`
    async fn owner_scan(&self, owner: &str, mint: &str) -> Result<TokenBalance>;

    /// Settled transaction post-balances, `None` while unconfirmed
    async fn tx_details(&self, tx_ref: &str) -> Result<Option<TxDetails>>;

    /// Native balance in SOL
    async fn native_balance(&self, owner: &str) -> Result<f64>;

    /// Decimals of a mint
    async fn mint_decimals(&self, mint: &str) -> Result<u8>;

    /// Whether the owner's associated token account for `mint` exists
    async fn account_exists(&self, owner: &str, mint: &str) -> Result<bool>;

    /// Close leftover wrapped-SOL dust, returning the tx reference if anything was closed
    async fn close_wrapped_dust(&self, owner: &str) -> Result<Option<String>>;
}

/// All collaborators the engine needs
#[derive(Clone)]
pub struct Services {
    pub owner: String,
    pub panel: Arc<dyn SignalPanel>,
    pub risk: Arc<dyn RiskClassifier>,
    pub quotes: Arc<dyn QuoteService>,
    pub swap: Arc<dyn SwapService>,
    pub ledger: Arc<dyn Ledger>,
}

/// Run an upstream call with an explicit timeout
pub async fn with_timeout<T, F>(op: &'static str, ms: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { op, ms }),
    }
}

/// Convert a UI amount to raw base units
pub fn to_raw(amount_ui: f64, decimals: u8) -> u64 {
    if amount_ui <= 0.0 {
        return 0;
    }
    (amount_ui * 10f64.powi(decimals as i32)).floor() as u64
}

/// Convert raw base units to a UI amount
pub fn to_ui(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}
