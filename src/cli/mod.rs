//! Command-line interface
//!
//! - `commands`: implementations behind each subcommand
//! - [`build_services`]: live or paper collaborator wiring shared by them

pub mod commands;

use anyhow::{Context, Result};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::services::{
    DexScreenerPanel, JupiterQuotes, Ledger, PanelRiskClassifier, PaperBook, PumpPortalSwap,
    QuoteService, RpcLedger, Services, SignalPanel,
};

/// Owner label used by the paper book when no keypair is configured
const PAPER_OWNER: &str = "paper-wallet";

/// Read a JSON byte-array keypair file
pub fn load_keypair(config: &Config) -> Result<Keypair> {
    let path = config
        .wallet
        .resolve_keypair_path()
        .context("No keypair configured: set wallet.keypair_path or KEYPAIR_PATH")?;
    let data = std::fs::read_to_string(&path)
        .with_context(|| format!("Cannot read keypair file {}", path))?;
    let bytes: Vec<u8> = serde_json::from_str(&data)
        .with_context(|| format!("Keypair file {} is not a JSON byte array", path))?;
    let keypair = Keypair::from_bytes(&bytes)
        .map_err(|e| anyhow::anyhow!("Invalid keypair in {}: {}", path, e))?;
    Ok(keypair)
}

/// Wire the collaborators for a run
///
/// `paper` swaps the PumpPortal submitter and RPC ledger for an in-memory
/// book filled at live Jupiter quotes; the keypair becomes optional.
pub fn build_services(config: &Config, paper: bool) -> Result<Services> {
    let rpc = Arc::new(RpcClient::new_with_timeout(
        config.rpc.endpoint.clone(),
        Duration::from_millis(config.rpc.timeout_ms),
    ));

    let panel: Arc<dyn SignalPanel> = Arc::new(DexScreenerPanel::new(
        &config.services.dexscreener_url,
        config.services.momentum_change_pct,
    ));
    let risk = Arc::new(PanelRiskClassifier::new(panel.clone()));
    let quotes: Arc<dyn QuoteService> = Arc::new(JupiterQuotes::new(
        &config.services.jupiter_url,
        Some(config.services.jupiter_api_key.clone()),
        config.rpc.timeout_ms,
    ));

    if paper {
        let owner = match load_keypair(config) {
            Ok(kp) => kp.pubkey().to_string(),
            Err(e) => {
                warn!("Paper mode without keypair ({}), using a placeholder owner", e);
                PAPER_OWNER.to_string()
            }
        };
        let decimals: Arc<dyn Ledger> = Arc::new(RpcLedger::new(rpc, None));
        let book = Arc::new(PaperBook::new(
            &owner,
            quotes.clone(),
            Some(decimals),
            config.services.paper_balance_sol,
            Duration::from_millis(config.services.paper_credit_delay_ms),
            config.edge.network_fee_sol,
        ));
        info!(
            owner = %owner,
            balance_sol = config.services.paper_balance_sol,
            "Paper trading book ready"
        );
        return Ok(Services {
            owner,
            panel,
            risk,
            quotes,
            swap: book.clone(),
            ledger: book,
        });
    }

    let keypair = Arc::new(load_keypair(config)?);
    let owner = keypair.pubkey().to_string();
    info!("Loaded keypair: {}", owner);

    let swap = Arc::new(PumpPortalSwap::new(
        &config.services.pumpportal_url,
        rpc.clone(),
        keypair.clone(),
        config.trading.priority_fee_sol,
    ));
    let ledger = Arc::new(RpcLedger::new(rpc, Some(keypair)));
    Ok(Services {
        owner,
        panel,
        risk,
        quotes,
        swap,
        ledger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_keypair_from_json_bytes() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let bytes: Vec<u8> = keypair.to_bytes().to_vec();
        write!(file, "{}", serde_json::to_string(&bytes).unwrap()).unwrap();

        let mut config = Config::default();
        config.wallet.keypair_path = file.path().to_string_lossy().to_string();
        let loaded = load_keypair(&config).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_load_keypair_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not a keypair").unwrap();
        let mut config = Config::default();
        config.wallet.keypair_path = file.path().to_string_lossy().to_string();
        assert!(load_keypair(&config).is_err());
    }
}
