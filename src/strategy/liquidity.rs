//! Liquidity & price-impact preflight
//!
//! Know if the prospective trade size moves the market before entering:
//! compares a small probe quote with the full-size quote.

use std::sync::Arc;
use tracing::debug;

use super::types::{PanelSnapshot, SOL_MINT};
use crate::config::SafetyConfig;
use crate::error::{Error, ErrorClass, Result};
use crate::services::{to_raw, with_timeout, QuoteService};

/// Probe size as a fraction of the full trade
const PROBE_DIVISOR: u64 = 10;

/// Preflight result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityCheck {
    pub liquidity_usd: f64,
    /// Yield loss of the full size versus the probe, percent
    pub impact_pct: f64,
}

pub struct LiquidityPreflight {
    min_liquidity_usd: f64,
    max_price_impact_pct: f64,
    quotes: Arc<dyn QuoteService>,
    slippage_bps: u16,
    call_timeout_ms: u64,
}

/// Extra loss per unit of the full quote relative to the probe quote
pub fn impact_pct(probe_in: u64, probe_out: u64, full_in: u64, full_out: u64) -> f64 {
    if probe_in == 0 || full_in == 0 || probe_out == 0 {
        return 100.0;
    }
    let probe_rate = probe_out as f64 / probe_in as f64;
    let full_rate = full_out as f64 / full_in as f64;
    ((1.0 - full_rate / probe_rate) * 100.0).max(0.0)
}

impl LiquidityPreflight {
    pub fn new(
        config: &SafetyConfig,
        quotes: Arc<dyn QuoteService>,
        slippage_bps: u16,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            min_liquidity_usd: config.min_liquidity_usd,
            max_price_impact_pct: config.max_price_impact_pct,
            quotes,
            slippage_bps,
            call_timeout_ms,
        }
    }

    async fn quote(&self, mint: &str, lamports: u64) -> Result<(u64, f64)> {
        let q = with_timeout(
            "quote",
            self.call_timeout_ms,
            self.quotes.quote(SOL_MINT, mint, lamports, self.slippage_bps),
        )
        .await;
        match q {
            Ok(q) => Ok((q.out_amount, q.price_impact_pct)),
            Err(e) if e.class() == ErrorClass::Transient => Err(e),
            Err(e) => Err(Error::LiquidityTooThin {
                mint: mint.to_string(),
                reason: format!("no quote: {}", e),
            }),
        }
    }

    /// Check panel liquidity and quote impact for spending `spend_sol`
    pub async fn check(
        &self,
        mint: &str,
        panel: &PanelSnapshot,
        spend_sol: f64,
    ) -> Result<LiquidityCheck> {
        if panel.liquidity_usd < self.min_liquidity_usd {
            return Err(Error::LiquidityTooThin {
                mint: mint.to_string(),
                reason: format!(
                    "liquidity ${:.0} below ${:.0}",
                    panel.liquidity_usd, self.min_liquidity_usd
                ),
            });
        }

        let full_in = to_raw(spend_sol, 9);
        let probe_in = (full_in / PROBE_DIVISOR).max(1);
        let (probe_out, _) = self.quote(mint, probe_in).await?;
        let (full_out, router_impact) = self.quote(mint, full_in).await?;

        let impact = impact_pct(probe_in, probe_out, full_in, full_out).max(router_impact);
        debug!(mint = %mint, spend_sol, impact_pct = impact, "Liquidity preflight");

        if impact > self.max_price_impact_pct {
            return Err(Error::LiquidityTooThin {
                mint: mint.to_string(),
                reason: format!(
                    "impact {:.2}% above {:.2}%",
                    impact, self.max_price_impact_pct
                ),
            });
        }

        Ok(LiquidityCheck {
            liquidity_usd: panel.liquidity_usd,
            impact_pct: impact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockQuotes;
    use crate::strategy::Badge;

    fn panel(liquidity: f64) -> PanelSnapshot {
        PanelSnapshot {
            score: 1.0,
            liquidity_usd: liquidity,
            volume_1h: 1.0,
            change_5m: 1.0,
            change_1h: 1.0,
            badge: Badge::Pumping,
        }
    }

    #[test]
    fn test_impact_math() {
        assert_eq!(impact_pct(10, 100, 100, 1000), 0.0);
        assert!((impact_pct(10, 100, 100, 900) - 10.0).abs() < 1e-9);
        assert_eq!(impact_pct(10, 0, 100, 1000), 100.0);
    }

    #[tokio::test]
    async fn test_thin_panel_liquidity_rejected() {
        let quotes = Arc::new(MockQuotes::new());
        let preflight = LiquidityPreflight::new(&SafetyConfig::default(), quotes.clone(), 100, 1000);
        let err = preflight.check("M", &panel(100.0), 0.1).await.unwrap_err();
        assert!(matches!(err, Error::LiquidityTooThin { .. }));
        assert_eq!(quotes.call_count(), 0);
    }

    #[tokio::test]
    async fn test_linear_quotes_pass() {
        let quotes = Arc::new(MockQuotes::new());
        quotes.set_rate(SOL_MINT, "M", 5.0);
        let preflight = LiquidityPreflight::new(&SafetyConfig::default(), quotes, 100, 1000);
        let check = preflight.check("M", &panel(50_000.0), 0.1).await.unwrap();
        assert!(check.impact_pct < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_route_rejected() {
        let quotes = Arc::new(MockQuotes::new());
        quotes.fail_route(SOL_MINT, "M");
        let preflight = LiquidityPreflight::new(&SafetyConfig::default(), quotes, 100, 1000);
        let err = preflight.check("M", &panel(50_000.0), 0.1).await.unwrap_err();
        assert!(err.blacklists_asset());
    }
}
