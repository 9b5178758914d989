//! Edge Estimator
//!
//! Simulates a buy-then-sell round trip with live quotes to estimate the net
//! proceeds after fees. Used as the pre-buy honeypot filter and shares its
//! fee treatment with sell-time valuation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{LAMPORTS_PER_SOL, SOL_MINT};
use crate::config::EdgeConfig;
use crate::error::{Error, ErrorClass, Result};
use crate::services::{to_raw, with_timeout, Ledger, QuoteService};

/// Net proceeds after fees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetProceeds {
    pub gross_sol: f64,
    pub platform_fee_sol: f64,
    /// False when the fee was skipped to keep a profitable trip profitable
    pub fee_applied: bool,
    pub fixed_costs_sol: f64,
    pub net_sol: f64,
}

/// Apply the platform fee dynamically plus fixed costs
///
/// The platform fee is skipped entirely when the trip is profitable against
/// `breakeven_sol` without it but would not be with it.
pub fn net_of_fees(
    gross_sol: f64,
    breakeven_sol: f64,
    platform_fee_bps: u16,
    fixed_costs_sol: f64,
) -> NetProceeds {
    let fee = gross_sol * platform_fee_bps as f64 / 10_000.0;
    let without_fee = gross_sol - fixed_costs_sol;
    let with_fee = without_fee - fee;
    let skip_fee = without_fee > breakeven_sol && with_fee <= breakeven_sol;

    NetProceeds {
        gross_sol,
        platform_fee_sol: if skip_fee { 0.0 } else { fee },
        fee_applied: !skip_fee,
        fixed_costs_sol,
        net_sol: if skip_fee { without_fee } else { with_fee },
    }
}

/// Simulated round trip
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundTripEdge {
    pub spend_sol: f64,
    /// Raw asset units the forward leg returns
    pub asset_out_raw: u64,
    pub ata_exists: bool,
    pub proceeds: NetProceeds,
    /// Net result relative to spend, percent
    pub edge_pct: f64,
}

pub struct EdgeEstimator {
    config: EdgeConfig,
    quotes: Arc<dyn QuoteService>,
    ledger: Arc<dyn Ledger>,
    owner: String,
    slippage_bps: u16,
    call_timeout_ms: u64,
}

impl EdgeEstimator {
    pub fn new(
        config: EdgeConfig,
        quotes: Arc<dyn QuoteService>,
        ledger: Arc<dyn Ledger>,
        owner: &str,
        slippage_bps: u16,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            config,
            quotes,
            ledger,
            owner: owner.to_string(),
            slippage_bps,
            call_timeout_ms,
        }
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// One quote leg; any non-transient failure or an empty result is a honeypot
    async fn leg(&self, mint: &str, input: &str, output: &str, amount: u64, which: &str) -> Result<u64> {
        let result = with_timeout(
            "quote",
            self.call_timeout_ms,
            self.quotes.quote(input, output, amount, self.slippage_bps),
        )
        .await;

        match result {
            Ok(q) if q.out_amount > 0 => Ok(q.out_amount),
            Ok(_) => Err(Error::Honeypot {
                mint: mint.to_string(),
                reason: format!("{} leg quoted zero", which),
            }),
            Err(e) if e.class() == ErrorClass::Transient => Err(e),
            Err(e) => Err(Error::Honeypot {
                mint: mint.to_string(),
                reason: format!("{} leg unquotable: {}", which, e),
            }),
        }
    }

    /// Forward then reverse quote for `spend_sol`
    pub async fn round_trip(&self, mint: &str, spend_sol: f64) -> Result<RoundTripEdge> {
        let lamports = to_raw(spend_sol, 9);
        let asset_out = self.leg(mint, SOL_MINT, mint, lamports, "forward").await?;
        let back_lamports = self.leg(mint, mint, SOL_MINT, asset_out, "reverse").await?;

        let ata_exists = with_timeout(
            "account_exists",
            self.call_timeout_ms,
            self.ledger.account_exists(&self.owner, mint),
        )
        .await
        .unwrap_or_else(|e| {
            debug!(mint = %mint, "ATA lookup failed, assuming missing: {}", e);
            false
        });

        let fixed = self.config.network_fee_sol
            + if ata_exists {
                0.0
            } else {
                self.config.ata_rent_sol
            };
        let proceeds = net_of_fees(
            back_lamports as f64 / LAMPORTS_PER_SOL,
            spend_sol,
            self.config.platform_fee_bps,
            fixed,
        );
        let edge_pct = if spend_sol > 0.0 {
            (proceeds.net_sol - spend_sol) / spend_sol * 100.0
        } else {
            0.0
        };

        debug!(
            mint = %mint,
            spend_sol,
            gross_sol = proceeds.gross_sol,
            net_sol = proceeds.net_sol,
            fee_applied = proceeds.fee_applied,
            edge_pct,
            "Round trip"
        );

        Ok(RoundTripEdge {
            spend_sol,
            asset_out_raw: asset_out,
            ata_exists,
            proceeds,
            edge_pct,
        })
    }

    /// Pre-buy gate: refuse unquotable assets and round trips losing too much
    pub async fn gate(&self, mint: &str, spend_sol: f64) -> Result<RoundTripEdge> {
        let edge = match self.round_trip(mint, spend_sol).await {
            Ok(edge) => edge,
            Err(e) => {
                warn!(mint = %mint, spend_sol, "Edge check failed: {}", e);
                return Err(e);
            }
        };

        if edge.edge_pct < -self.config.max_round_trip_loss_pct {
            info!(
                mint = %mint,
                edge_pct = edge.edge_pct,
                limit_pct = -self.config.max_round_trip_loss_pct,
                "Round trip too lossy"
            );
            return Err(Error::EdgeTooThin {
                mint: mint.to_string(),
                edge_pct: edge.edge_pct,
                limit_pct: -self.config.max_round_trip_loss_pct,
            });
        }
        Ok(edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::{MockLedger, MockQuotes};

    fn estimator(quotes: Arc<MockQuotes>, ledger: Arc<MockLedger>) -> EdgeEstimator {
        EdgeEstimator::new(
            EdgeConfig {
                platform_fee_bps: 100,
                network_fee_sol: 0.0001,
                ata_rent_sol: 0.002,
                max_round_trip_loss_pct: 12.0,
            },
            quotes,
            ledger,
            "me",
            500,
            1000,
        )
    }

    #[test]
    fn test_fee_skipped_when_it_would_flip_profit() {
        // 1.005 back on 1.0: profitable without the 1% fee, a loss with it
        let p = net_of_fees(1.005, 1.0, 100, 0.0);
        assert!(!p.fee_applied);
        assert_eq!(p.net_sol, 1.005);

        // Clearly profitable either way: fee applies
        let p = net_of_fees(1.2, 1.0, 100, 0.0);
        assert!(p.fee_applied);
        assert!((p.net_sol - 1.188).abs() < 1e-12);

        // Already a loss: fee applies
        let p = net_of_fees(0.9, 1.0, 100, 0.0);
        assert!(p.fee_applied);
    }

    #[tokio::test]
    async fn test_round_trip_includes_ata_rent() {
        let quotes = Arc::new(MockQuotes::new());
        quotes.set_rate(SOL_MINT, "M", 10.0);
        quotes.set_rate("M", SOL_MINT, 0.098);
        let ledger = Arc::new(MockLedger::new());
        let edge = estimator(quotes, ledger.clone());

        let missing = edge.round_trip("M", 1.0).await.unwrap();
        assert!(!missing.ata_exists);
        assert!((missing.proceeds.fixed_costs_sol - 0.0021).abs() < 1e-12);

        ledger.set_account_exists("M");
        let existing = edge.round_trip("M", 1.0).await.unwrap();
        assert!(existing.edge_pct > missing.edge_pct);
        // 0.98 back, 1% fee, network fee
        assert!((existing.proceeds.net_sol - (0.98 - 0.0098 - 0.0001)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_reverse_quote_is_honeypot() {
        let quotes = Arc::new(MockQuotes::new());
        quotes.set_rate(SOL_MINT, "M", 10.0);
        quotes.set_rate("M", SOL_MINT, 0.0);
        let edge = estimator(quotes, Arc::new(MockLedger::new()));

        let err = edge.gate("M", 0.1).await.unwrap_err();
        assert!(matches!(err, Error::Honeypot { .. }));
        assert!(err.blacklists_asset());
    }

    #[tokio::test]
    async fn test_unroutable_forward_is_honeypot() {
        let quotes = Arc::new(MockQuotes::new());
        quotes.fail_route(SOL_MINT, "M");
        let edge = estimator(quotes.clone(), Arc::new(MockLedger::new()));

        let err = edge.gate("M", 0.1).await.unwrap_err();
        assert!(matches!(err, Error::Honeypot { .. }));
        // Reverse leg never attempted
        assert_eq!(quotes.call_count(), 1);
    }

    #[tokio::test]
    async fn test_lossy_round_trip_refused() {
        let quotes = Arc::new(MockQuotes::new());
        quotes.set_rate(SOL_MINT, "M", 10.0);
        quotes.set_rate("M", SOL_MINT, 0.08);
        let ledger = Arc::new(MockLedger::new());
        ledger.set_account_exists("M");
        let edge = estimator(quotes, ledger);

        let err = edge.gate("M", 1.0).await.unwrap_err();
        assert!(matches!(err, Error::EdgeTooThin { .. }));
    }
}
