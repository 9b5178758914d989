//! Sell execution
//!
//! Re-validates the on-chain balance, takes the asset lock, submits the swap,
//! waits for the debit, then closes or shrinks the position.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::context::{SellAction, SellDecision};
use crate::config::TradingConfig;
use crate::error::{Error, ErrorClass, Result};
use crate::position::{Position, PositionManager};
use crate::registry::LockRegistry;
use crate::services::{with_timeout, Services};
use crate::strategy::SOL_MINT;

/// Balances at or below this are treated as empty
const DUST_UI: f64 = 1e-9;

/// Outcome of one executed sell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub mint: String,
    pub tx_ref: Option<String>,
    pub sold_ui: f64,
    pub remaining_ui: f64,
    pub proceeds_sol: f64,
    pub closed: bool,
    pub reason: String,
}

pub struct SellExecutor {
    services: Services,
    registry: Arc<LockRegistry>,
    positions: Arc<PositionManager>,
    slippage_bps: u16,
    swap_timeout_ms: u64,
    call_timeout_ms: u64,
    debit_retries: u32,
    debit_retry_ms: u64,
}

impl SellExecutor {
    pub fn new(
        trading: &TradingConfig,
        call_timeout_ms: u64,
        services: Services,
        registry: Arc<LockRegistry>,
        positions: Arc<PositionManager>,
    ) -> Self {
        Self {
            services,
            registry,
            positions,
            slippage_bps: trading.slippage_bps,
            swap_timeout_ms: trading.swap_timeout_ms,
            call_timeout_ms,
            debit_retries: trading.debit_retries,
            debit_retry_ms: trading.debit_retry_ms,
        }
    }

    async fn on_chain(&self, mint: &str) -> Result<f64> {
        let balance = with_timeout(
            "balance",
            self.call_timeout_ms,
            self.services.ledger.balance(&self.services.owner, mint),
        )
        .await?;
        Ok(balance.quantity)
    }

    /// Poll until the balance drops to `target_ui` or below
    async fn await_debit(&self, mint: &str, before_ui: f64, target_ui: f64) -> Result<f64> {
        let tolerance = (before_ui - target_ui).abs() * 0.01;
        for attempt in 1..=self.debit_retries.max(1) {
            match self.on_chain(mint).await {
                Ok(quantity) if quantity <= target_ui + tolerance => return Ok(quantity),
                Ok(quantity) => {
                    debug!(mint = %mint, attempt, quantity, target_ui, "Debit not visible yet");
                }
                Err(e) => debug!(mint = %mint, attempt, "Debit poll failed: {}", e),
            }
            tokio::time::sleep(Duration::from_millis(self.debit_retry_ms)).await;
        }
        Err(Error::Timeout {
            op: "debit",
            ms: self.debit_retry_ms * self.debit_retries as u64,
        })
    }

    async fn close(&self, position: &Position, reason: &str) -> Result<()> {
        self.positions.close(&position.mint, reason).await?;
        match self.services.ledger.close_wrapped_dust(&self.services.owner).await {
            Ok(Some(tx)) => info!(tx = %tx, "Closed wrapped SOL dust"),
            Ok(None) => {}
            Err(e) => warn!("Wrapped SOL cleanup failed: {}", e),
        }
        Ok(())
    }

    /// Execute `decision` against the current position
    ///
    /// `expected_net_sol` is the valuation of the whole position this tick;
    /// proceeds are pro-rated from it.
    pub async fn execute(
        &self,
        mint: &str,
        decision: &SellDecision,
        expected_net_sol: f64,
    ) -> Result<ExecutionReport> {
        let fraction = match decision.action {
            SellAction::None => {
                return Err(Error::Internal("nothing to execute".into()));
            }
            SellAction::Partial(pct) => pct / 100.0,
            SellAction::All => 1.0,
        };

        let now = Utc::now();
        self.registry.check_router(now)?;
        let _lock = self.registry.lock_asset(mint, now)?;
        let position = self.positions.begin_selling(mint).await?;

        let result = self.sell_locked(&position, decision, fraction, expected_net_sol).await;
        if result.is_err() {
            self.positions.abort_selling().await;
        }
        result
    }

    async fn sell_locked(
        &self,
        position: &Position,
        decision: &SellDecision,
        fraction: f64,
        expected_net_sol: f64,
    ) -> Result<ExecutionReport> {
        let mint = position.mint.as_str();

        // Never trust the recorded size: sell what is actually there
        let held = self.on_chain(mint).await?;
        if held <= DUST_UI {
            info!(mint = %mint, "Balance already empty, closing position");
            self.close(position, "verified empty").await?;
            return Ok(ExecutionReport {
                mint: mint.to_string(),
                tx_ref: None,
                sold_ui: 0.0,
                remaining_ui: 0.0,
                proceeds_sol: 0.0,
                closed: true,
                reason: decision.reason.clone(),
            });
        }

        let full = matches!(decision.action, SellAction::All) || fraction >= 1.0;
        let amount = if full { held } else { held * fraction };
        let target = if full { 0.0 } else { held - amount };

        info!(
            mint = %mint,
            amount,
            held,
            decision = %decision,
            "Submitting sell"
        );
        let submitted = with_timeout(
            "swap",
            self.swap_timeout_ms,
            self.services
                .swap
                .swap(mint, SOL_MINT, amount, self.slippage_bps),
        )
        .await;
        let tx_ref = match submitted {
            Ok(tx) => tx,
            Err(e) => {
                if matches!(e.class(), ErrorClass::Transient | ErrorClass::Structural) {
                    self.registry.trip_router(Utc::now());
                }
                error!(mint = %mint, "Sell submission failed: {}", e);
                return Err(e);
            }
        };

        let remaining = self.await_debit(mint, held, target).await?;
        let sold = (held - remaining).max(0.0);
        let proceeds = if position.size_ui > 0.0 {
            expected_net_sol * (sold / held.max(position.size_ui))
        } else {
            0.0
        };

        let closed = remaining <= DUST_UI;
        if closed {
            self.close(position, &decision.reason).await?;
        } else {
            self.positions.apply_partial(mint, remaining, proceeds).await?;
        }

        info!(
            mint = %mint,
            tx = %tx_ref,
            sold,
            remaining,
            proceeds_sol = proceeds,
            closed,
            "Sell executed"
        );
        Ok(ExecutionReport {
            mint: mint.to_string(),
            tx_ref: Some(tx_ref),
            sold_ui: sold,
            remaining_ui: remaining,
            proceeds_sol: proceeds,
            closed,
            reason: decision.reason.clone(),
        })
    }
}
