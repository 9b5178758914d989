//! Buy path: sizing, pre-buy safety gate and submission

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::Engine;
use crate::config::TradingConfig;
use crate::error::{Error, ErrorClass, Result};
use crate::position::{PendingCredit, Position};
use crate::services::{to_ui, with_timeout};
use crate::strategy::{EntryMode, PanelSnapshot, SOL_MINT};

/// Spend for one buy: a fraction of the native balance, clamped, keeping the fee reserve
pub fn buy_spend(native_sol: f64, fraction: f64, trading: &TradingConfig) -> Option<f64> {
    let available = native_sol - trading.fee_reserve_sol;
    if available <= 0.0 {
        return None;
    }
    let spend = (native_sol * fraction)
        .min(trading.max_buy_sol)
        .min(available);
    (spend >= trading.min_buy_sol).then_some(spend)
}

impl Engine {
    /// Gate and submit a buy of `mint`, opening the provisional position
    ///
    /// Returns the transaction reference. Gate failures come back as errors;
    /// the caller decides whether they blacklist the asset.
    pub(crate) async fn buy(
        &self,
        generation: u64,
        mint: &str,
        panel: &PanelSnapshot,
        mode: EntryMode,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let _buy_lock = self.registry.lock_buy(now)?;
        let _asset_lock = self.registry.lock_asset(mint, now)?;
        self.registry.check_ban(mint, now)?;

        if let Some(existing) = self.positions.snapshot().await {
            return Err(Error::PositionExists(existing.mint));
        }

        let call_ms = self.config.engine.call_timeout_ms;
        let owner = self.services.owner.as_str();

        let risk = with_timeout("risk", call_ms, self.services.risk.risk_signal(mint)).await?;
        let max_severity = self.config.safety.max_buy_severity;
        if risk.rugged || risk.severity > max_severity {
            return Err(Error::RiskTooHigh {
                mint: mint.to_string(),
                severity: risk.severity,
                limit: max_severity,
            });
        }
        self.check_generation(generation)?;

        let native = with_timeout("native_balance", call_ms, self.services.ledger.native_balance(owner)).await?;
        let fraction = self.settings.read().await.buy_fraction;
        let Some(spend) = buy_spend(native, fraction, &self.config.trading) else {
            return Err(Error::InsufficientBalance {
                available: native,
                required: self.config.trading.min_buy_sol + self.config.trading.fee_reserve_sol,
            });
        };

        let liquidity = self.liquidity.check(mint, panel, spend).await?;
        self.check_generation(generation)?;
        let edge = self.edge.gate(mint, spend).await?;
        self.check_generation(generation)?;

        self.registry.check_router(Utc::now())?;
        let decimals = with_timeout("mint_decimals", call_ms, self.services.ledger.mint_decimals(mint))
            .await
            .unwrap_or_else(|e| {
                debug!(mint = %mint, "Decimals lookup failed, assuming 6: {}", e);
                6
            });
        let expected_size = to_ui(edge.asset_out_raw, decimals);

        info!(
            mint = %mint,
            spend_sol = spend,
            expected_size,
            edge_pct = edge.edge_pct,
            impact_pct = liquidity.impact_pct,
            severity = risk.severity,
            mode = %mode,
            "Submitting buy"
        );
        let submitted = with_timeout(
            "swap",
            self.config.trading.swap_timeout_ms,
            self.services
                .swap
                .swap(SOL_MINT, mint, spend, self.config.trading.slippage_bps),
        )
        .await;
        let tx_ref = match submitted {
            Ok(tx) => tx,
            Err(e) => {
                if matches!(e.class(), ErrorClass::Transient | ErrorClass::Structural) {
                    self.registry.trip_router(Utc::now());
                }
                warn!(mint = %mint, "Buy submission failed: {}", e);
                return Err(e);
            }
        };

        // Provisional position and pending credit are created under the asset lock
        let submitted_at = Utc::now();
        let provisional = Position::provisional(mint, spend, expected_size, decimals, mode, submitted_at);
        self.positions.open_provisional(provisional, &tx_ref).await?;
        self.reconciler.enqueue(PendingCredit::new(
            mint,
            &tx_ref,
            spend,
            expected_size,
            decimals,
            None,
            submitted_at,
            self.reconciler.ttl(),
        ));
        self.reconciler.ensure_running(self.cancel.child_token());

        Ok(tx_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_spend_clamps() {
        let trading = TradingConfig::default();
        // 25% of 0.2 = 0.05
        assert_eq!(buy_spend(0.2, 0.25, &trading), Some(0.05));
        // Capped by max_buy_sol
        assert_eq!(buy_spend(10.0, 0.25, &trading), Some(0.1));
        // Reserve leaves too little
        assert_eq!(buy_spend(0.025, 1.0, &trading), None);
        // Below minimum
        assert_eq!(buy_spend(0.03, 0.25, &trading), None);
    }

    #[test]
    fn test_buy_spend_keeps_reserve() {
        let trading = TradingConfig::default();
        let spend = buy_spend(0.05, 1.0, &trading).unwrap();
        assert!((spend - 0.03).abs() < 1e-12);
    }
}
