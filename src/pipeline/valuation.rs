//! Sell-time valuation
//!
//! Quotes the full position back into SOL and applies the same fee treatment
//! as the pre-buy round trip.

use std::sync::Arc;
use tracing::debug;

use super::context::Valuation;
use crate::config::EdgeConfig;
use crate::error::{ErrorClass, Result};
use crate::position::Position;
use crate::services::{to_raw, with_timeout, QuoteService};
use crate::strategy::{net_of_fees, LAMPORTS_PER_SOL, SOL_MINT};

pub struct Valuator {
    config: EdgeConfig,
    quotes: Arc<dyn QuoteService>,
    slippage_bps: u16,
    call_timeout_ms: u64,
}

impl Valuator {
    pub fn new(
        config: EdgeConfig,
        quotes: Arc<dyn QuoteService>,
        slippage_bps: u16,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            config,
            quotes,
            slippage_bps,
            call_timeout_ms,
        }
    }

    /// Net exit value of `position` right now
    ///
    /// Transient quote failures propagate so the tick is skipped; a position
    /// that cannot be quoted at all values at zero and is flagged.
    pub async fn value(&self, position: &Position) -> Result<Valuation> {
        let raw = to_raw(position.size_ui, position.decimals);
        let quoted = with_timeout(
            "quote",
            self.call_timeout_ms,
            self.quotes
                .quote(&position.mint, SOL_MINT, raw, self.slippage_bps),
        )
        .await;

        let (gross_sol, unquotable) = match quoted {
            Ok(q) => (q.out_amount as f64 / LAMPORTS_PER_SOL, q.out_amount == 0),
            Err(e) if e.class() == ErrorClass::Transient => return Err(e),
            Err(e) => {
                debug!(mint = %position.mint, "Exit leg unquotable: {}", e);
                (0.0, true)
            }
        };

        // Breakeven is what is still unrecovered from the cost basis
        let breakeven = (position.cost_basis_sol - position.realized_sol).max(0.0);
        let proceeds = net_of_fees(
            gross_sol,
            breakeven,
            self.config.platform_fee_bps,
            self.config.network_fee_sol,
        );
        let net = proceeds.net_sol.max(0.0);

        Ok(Valuation {
            proceeds,
            unit_price: position.unit_price(net),
            pnl_pct: position.pnl_pct(net),
            unquotable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::services::mock::MockQuotes;
    use crate::strategy::EntryMode;
    use chrono::Utc;

    fn config() -> EdgeConfig {
        EdgeConfig {
            platform_fee_bps: 100,
            network_fee_sol: 0.0,
            ata_rent_sol: 0.002,
            max_round_trip_loss_pct: 12.0,
        }
    }

    fn position() -> Position {
        let mut p = Position::provisional("M", 1.0, 1000.0, 6, EntryMode::Momentum, Utc::now());
        p.awaiting_size_sync = false;
        p
    }

    #[tokio::test]
    async fn test_value_applies_fee() {
        let quotes = Arc::new(MockQuotes::new());
        // 1000 units * 1e6 raw * 0.0012 = 1.2 SOL
        quotes.set_rate("M", SOL_MINT, 1.2);
        let valuator = Valuator::new(config(), quotes, 500, 1000);
        let v = valuator.value(&position()).await.unwrap();
        assert!((v.net_sol() - 1.188).abs() < 1e-9);
        assert!((v.pnl_pct - 18.8).abs() < 1e-6);
        assert!(!v.unquotable);
    }

    #[tokio::test]
    async fn test_unquotable_values_at_zero() {
        let quotes = Arc::new(MockQuotes::new());
        quotes.fail_route("M", SOL_MINT);
        let valuator = Valuator::new(config(), quotes, 500, 1000);
        let v = valuator.value(&position()).await.unwrap();
        assert!(v.unquotable);
        assert_eq!(v.net_sol(), 0.0);
        assert!((v.pnl_pct + 100.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_propagates() {
        struct Slow;
        #[async_trait::async_trait]
        impl QuoteService for Slow {
            async fn quote(&self, _: &str, _: &str, _: u64, _: u16) -> Result<crate::services::Quote> {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Err(Error::Internal("unreachable".into()))
            }
        }
        let valuator = Valuator::new(config(), Arc::new(Slow), 500, 100);
        let err = valuator.value(&position()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
