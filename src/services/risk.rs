//! Risk classifier derived from the signal panel

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::{RiskClassifier, SignalPanel};
use crate::error::Result;
use crate::strategy::{PanelSnapshot, RugSignal};

/// Liquidity below which severity starts climbing
const THIN_LIQUIDITY_USD: f64 = 20_000.0;
/// Fraction of peak liquidity lost that counts as a rug
const RUG_LIQUIDITY_DROP: f64 = 0.6;
/// 5m change at or below which the exit flag is raised
const URGENT_CHANGE_5M: f64 = -30.0;

/// Severity, rug and urgent flags from panel rows
///
/// Tracks the peak liquidity seen per asset so a collapse is detected even
/// when the absolute level still looks healthy.
pub struct PanelRiskClassifier {
    panel: Arc<dyn SignalPanel>,
    peak_liquidity: DashMap<String, f64>,
}

impl PanelRiskClassifier {
    pub fn new(panel: Arc<dyn SignalPanel>) -> Self {
        Self {
            panel,
            peak_liquidity: DashMap::new(),
        }
    }

    /// Classify one row against the tracked peak liquidity
    pub fn classify(&self, mint: &str, row: &PanelSnapshot) -> RugSignal {
        let peak = {
            let mut entry = self
                .peak_liquidity
                .entry(mint.to_string())
                .or_insert(row.liquidity_usd);
            if row.liquidity_usd > *entry {
                *entry = row.liquidity_usd;
            }
            *entry
        };

        let thinness = if row.liquidity_usd >= THIN_LIQUIDITY_USD {
            0.0
        } else {
            1.0 - row.liquidity_usd.max(0.0) / THIN_LIQUIDITY_USD
        };
        let falling = (-row.change_5m).max(0.0) / 50.0 + (-row.change_1h).max(0.0) / 100.0;
        let severity = (0.6 * thinness + falling).clamp(0.0, 1.0);

        let rugged = peak > 0.0 && row.liquidity_usd < peak * (1.0 - RUG_LIQUIDITY_DROP);

        RugSignal {
            badge: row.badge,
            severity: if rugged { 1.0 } else { severity },
            rugged,
            urgent: rugged || row.change_5m <= URGENT_CHANGE_5M,
        }
    }
}

#[async_trait]
impl RiskClassifier for PanelRiskClassifier {
    async fn risk_signal(&self, mint: &str) -> Result<RugSignal> {
        let row = self.panel.focus(mint).await?;
        Ok(self.classify(mint, &row))
    }
}
