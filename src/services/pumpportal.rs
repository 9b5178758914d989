//! PumpPortal local-trade API as the swap service
//!
//! PumpPortal builds an unsigned transaction for the trade; it is signed
//! locally with the wallet keypair and submitted through our own RPC.
//!
//! API Documentation: https://pumpportal.fun/trading-api/

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use tracing::{debug, info};

use super::SwapService;
use crate::error::{Error, Result};
use crate::strategy::SOL_MINT;

/// Trade action
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// Pool type for trading
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Pump,
    Raydium,
    #[serde(rename = "pump-amm")]
    PumpAmm,
    #[default]
    Auto,
}

/// Local trade request (returns an unsigned transaction)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTradeRequest {
    pub action: TradeAction,
    pub mint: String,
    /// SOL for buys, token amount or percentage for sells
    pub amount: String,
    pub denominated_in_sol: String,
    /// Slippage percentage
    pub slippage: u32,
    /// Priority fee in SOL
    pub priority_fee: f64,
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolType>,
}

impl LocalTradeRequest {
    /// Map a generic swap onto a PumpPortal buy or sell
    pub fn for_swap(
        public_key: &str,
        input: &str,
        output: &str,
        amount_ui: f64,
        slippage_bps: u16,
        priority_fee: f64,
    ) -> Result<Self> {
        let (action, mint) = match (input == SOL_MINT, output == SOL_MINT) {
            (true, false) => (TradeAction::Buy, output),
            (false, true) => (TradeAction::Sell, input),
            _ => {
                return Err(Error::NoRoute {
                    input: input.to_string(),
                    output: output.to_string(),
                })
            }
        };
        Ok(Self {
            action,
            mint: mint.to_string(),
            amount: amount_ui.to_string(),
            denominated_in_sol: (action == TradeAction::Buy).to_string(),
            slippage: (slippage_bps as u32).div_ceil(100).max(1),
            priority_fee,
            public_key: public_key.to_string(),
            pool: Some(PoolType::Auto),
        })
    }
}

pub struct PumpPortalSwap {
    client: Client,
    url: String,
    rpc: Arc<RpcClient>,
    keypair: Arc<Keypair>,
    priority_fee: f64,
}

impl PumpPortalSwap {
    pub fn new(url: &str, rpc: Arc<RpcClient>, keypair: Arc<Keypair>, priority_fee: f64) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
            rpc,
            keypair,
            priority_fee,
        }
    }

    async fn fetch_unsigned(&self, request: &LocalTradeRequest) -> Result<Vec<u8>> {
        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimited("pumpportal".to_string()));
        }
        if status.is_server_error() {
            return Err(Error::Upstream(format!("pumpportal {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transaction(format!("pumpportal {}: {}", status, body)));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SwapService for PumpPortalSwap {
    async fn swap(
        &self,
        input: &str,
        output: &str,
        amount_ui: f64,
        slippage_bps: u16,
    ) -> Result<String> {
        let request = LocalTradeRequest::for_swap(
            &self.keypair.pubkey().to_string(),
            input,
            output,
            amount_ui,
            slippage_bps,
            self.priority_fee,
        )?;

        info!(
            action = ?request.action,
            mint = %request.mint,
            amount = %request.amount,
            "Requesting trade transaction"
        );

        let bytes = self.fetch_unsigned(&request).await?;
        let unsigned: VersionedTransaction = bincode::deserialize(&bytes)
            .map_err(|e| Error::Serialization(format!("unsigned transaction: {}", e)))?;
        let signed = VersionedTransaction::try_new(unsigned.message, &[self.keypair.as_ref()])
            .map_err(|e| Error::Transaction(format!("signing failed: {}", e)))?;

        let signature = self
            .rpc
            .send_transaction_with_config(
                &signed,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    ..Default::default()
                },
            )
            .await?;

        debug!(signature = %signature, "Trade submitted");
        Ok(signature.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_request() {
        let request =
            LocalTradeRequest::for_swap("PK", SOL_MINT, "MintA", 0.05, 1500, 0.0005).unwrap();
        assert_eq!(request.action, TradeAction::Buy);
        assert_eq!(request.mint, "MintA");
        assert_eq!(request.slippage, 15);

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"action\":\"buy\""));
        assert!(json.contains("\"denominatedInSol\":\"true\""));
        assert!(json.contains("\"pool\":\"auto\""));
    }

    #[test]
    fn test_sell_request() {
        let request =
            LocalTradeRequest::for_swap("PK", "MintA", SOL_MINT, 1234.5, 50, 0.0005).unwrap();
        assert_eq!(request.action, TradeAction::Sell);
        assert_eq!(request.denominated_in_sol, "false");
        assert_eq!(request.slippage, 1);
    }

    #[test]
    fn test_token_to_token_has_no_route() {
        let err = LocalTradeRequest::for_swap("PK", "A", "B", 1.0, 100, 0.0).unwrap_err();
        assert!(matches!(err, Error::NoRoute { .. }));
    }
}
