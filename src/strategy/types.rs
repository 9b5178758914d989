//! Shared domain types for selection, triggering and selling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapped SOL mint, the base currency of every trade
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Coarse risk/momentum classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    #[default]
    Calm,
    Warming,
    Pumping,
}

impl Badge {
    /// Ranking weight used by the candidate selector
    pub fn weight(&self) -> f64 {
        match self {
            Badge::Calm => 0.0,
            Badge::Warming => 1.5,
            Badge::Pumping => 3.0,
        }
    }
}

impl std::fmt::Display for Badge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Badge::Calm => write!(f, "calm"),
            Badge::Warming => write!(f, "warming"),
            Badge::Pumping => write!(f, "pumping"),
        }
    }
}

/// External hazard classification of one asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RugSignal {
    pub badge: Badge,
    /// 0..1
    pub severity: f64,
    pub rugged: bool,
    /// Externally raised "exit now" flag
    #[serde(default)]
    pub urgent: bool,
}

/// One signal-panel lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PanelSnapshot {
    pub score: f64,
    pub liquidity_usd: f64,
    pub volume_1h: f64,
    /// Short window price change, percent
    pub change_5m: f64,
    /// Medium window price change, percent
    pub change_1h: f64,
    pub badge: Badge,
}

/// Timestamped observation kept in the history store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    pub at: DateTime<Utc>,
    pub score: f64,
    pub liquidity_usd: f64,
    pub volume_1h: f64,
    pub change_5m: f64,
    pub change_1h: f64,
}

impl SignalSample {
    pub fn from_panel(at: DateTime<Utc>, panel: &PanelSnapshot) -> Self {
        Self {
            at,
            score: panel.score,
            liquidity_usd: panel.liquidity_usd,
            volume_1h: panel.volume_1h,
            change_5m: panel.change_5m,
            change_1h: panel.change_1h,
        }
    }
}

/// Which sample field a slope query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalField {
    Score,
    Liquidity,
    Volume,
    Change5m,
    Change1h,
}

impl SignalField {
    pub fn read(&self, sample: &SignalSample) -> f64 {
        match self {
            SignalField::Score => sample.score,
            SignalField::Liquidity => sample.liquidity_usd,
            SignalField::Volume => sample.volume_1h,
            SignalField::Change5m => sample.change_5m,
            SignalField::Change1h => sample.change_1h,
        }
    }
}

/// Which trigger opened a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Pumping badge with positive momentum
    #[default]
    Momentum,
    /// Warming badge, entered early
    WarmRide,
    /// Followed the external leader
    Leader,
    Manual,
}

impl std::fmt::Display for EntryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryMode::Momentum => write!(f, "momentum"),
            EntryMode::WarmRide => write!(f, "warm_ride"),
            EntryMode::Leader => write!(f, "leader"),
            EntryMode::Manual => write!(f, "manual"),
        }
    }
}

/// Candidate selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Best of the top-N discoverable assets
    #[default]
    TopN,
    /// Follow the externally designated leader while momentum mode is on
    Leader,
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionMode::TopN => write!(f, "top_n"),
            SelectionMode::Leader => write!(f, "leader"),
        }
    }
}

impl std::str::FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "top_n" | "topn" => Ok(SelectionMode::TopN),
            "leader" => Ok(SelectionMode::Leader),
            other => Err(format!("unknown selection mode: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_badge_weight_ordering() {
        assert!(Badge::Pumping.weight() > Badge::Warming.weight());
        assert!(Badge::Warming.weight() > Badge::Calm.weight());
    }

    #[test]
    fn test_selection_mode_parse() {
        assert_eq!("top-n".parse::<SelectionMode>().unwrap(), SelectionMode::TopN);
        assert_eq!("Leader".parse::<SelectionMode>().unwrap(), SelectionMode::Leader);
        assert!("best".parse::<SelectionMode>().is_err());
    }

    #[test]
    fn test_badge_serde() {
        let json = serde_json::to_string(&Badge::Pumping).unwrap();
        assert_eq!(json, r#""pumping""#);
    }
}
