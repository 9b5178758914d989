//! DexScreener pairs API as the signal panel

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use super::SignalPanel;
use crate::error::{Error, Result};
use crate::strategy::{Badge, PanelSnapshot};

/// Rows younger than this are served from cache
const ROW_TTL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenProfile {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "tokenAddress")]
    pub token_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBoost {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "tokenAddress")]
    pub token_address: String,
    #[serde(rename = "totalAmount")]
    pub total_amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChange {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnCount {
    pub buys: u32,
    pub sells: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Txns {
    pub m5: Option<TxnCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub h1: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "dexId")]
    pub dex_id: String,
    #[serde(rename = "priceChange")]
    pub price_change: Option<PriceChange>,
    pub txns: Option<Txns>,
    pub volume: Option<Volume>,
    pub liquidity: Option<Liquidity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPairsResponse {
    pub pairs: Option<Vec<DexPair>>,
}

/// Classify a pair's momentum into a badge
pub fn classify_badge(change_5m: f64, change_1h: f64, buy_sell_ratio: f64) -> Badge {
    if change_5m >= 10.0 && buy_sell_ratio >= 1.2 {
        Badge::Pumping
    } else if change_5m > 2.0 || (change_1h > 10.0 && change_5m >= 0.0) {
        Badge::Warming
    } else {
        Badge::Calm
    }
}

/// Convert a pair into a panel row
pub fn pair_to_snapshot(pair: &DexPair) -> PanelSnapshot {
    let change_5m = pair.price_change.as_ref().and_then(|pc| pc.m5).unwrap_or(0.0);
    let change_1h = pair.price_change.as_ref().and_then(|pc| pc.h1).unwrap_or(0.0);
    let (buys, sells) = pair
        .txns
        .as_ref()
        .and_then(|t| t.m5.as_ref())
        .map(|m5| (m5.buys, m5.sells))
        .unwrap_or((0, 0));
    let ratio = if sells > 0 {
        buys as f64 / sells as f64
    } else {
        buys as f64
    };

    // Momentum plus activity, ratio influence capped against wash trading
    let score = change_5m * 2.0
        + change_1h.max(0.0) * 0.5
        + (buys as f64 - sells as f64).max(0.0) * 0.5
        + (ratio.min(5.0) - 1.0).max(0.0) * 10.0;

    PanelSnapshot {
        score,
        liquidity_usd: pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0),
        volume_1h: pair.volume.as_ref().and_then(|v| v.h1).unwrap_or(0.0),
        change_5m,
        change_1h,
        badge: classify_badge(change_5m, change_1h, ratio),
    }
}

pub struct DexScreenerPanel {
    client: reqwest::Client,
    base_url: String,
    momentum_change_pct: f64,
    rows: DashMap<String, (Instant, PanelSnapshot)>,
}

impl DexScreenerPanel {
    pub fn new(base_url: &str, momentum_change_pct: f64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            momentum_change_pct,
            rows: DashMap::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;
        if resp.status().as_u16() == 429 {
            return Err(Error::RateLimited(url));
        }
        let resp = resp.error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn top_boosts(&self) -> Result<Vec<TokenBoost>> {
        let boosts: Vec<TokenBoost> = self.get_json("/token-boosts/top/v1").await?;
        Ok(boosts.into_iter().filter(|b| b.chain_id == "solana").collect())
    }

    async fn latest_profiles(&self) -> Result<Vec<TokenProfile>> {
        let profiles: Vec<TokenProfile> = self.get_json("/token-profiles/latest/v1").await?;
        Ok(profiles
            .into_iter()
            .filter(|p| p.chain_id == "solana")
            .collect())
    }

    async fn pair(&self, mint: &str) -> Result<DexPair> {
        let data: TokenPairsResponse = self
            .get_json(&format!("/latest/dex/tokens/{}", mint))
            .await?;
        let pairs = data.pairs.unwrap_or_default();
        // Prefer pumpswap/pumpfun pairs
        pairs
            .iter()
            .find(|p| p.dex_id == "pumpswap" || p.dex_id == "pumpfun")
            .or_else(|| pairs.first())
            .cloned()
            .ok_or_else(|| Error::Upstream(format!("no pairs for {}", mint)))
    }

    /// Drop cached rows past their TTL
    fn evict_stale(&self) {
        self.rows.retain(|_, (at, _)| at.elapsed() < ROW_TTL);
    }
}

#[async_trait]
impl SignalPanel for DexScreenerPanel {
    async fn focus(&self, mint: &str) -> Result<PanelSnapshot> {
        if let Some(entry) = self.rows.get(mint) {
            if entry.0.elapsed() < ROW_TTL {
                return Ok(entry.1.clone());
            }
        }
        let snapshot = pair_to_snapshot(&self.pair(mint).await?);
        self.rows
            .insert(mint.to_string(), (Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }

    async fn discover(&self, limit: usize) -> Result<Vec<String>> {
        self.evict_stale();
        let mut seen = std::collections::HashSet::new();
        let mut mints = Vec::new();

        let boosts = self.top_boosts().await?;
        for boost in boosts {
            if seen.insert(boost.token_address.clone()) {
                mints.push(boost.token_address);
            }
        }
        match self.latest_profiles().await {
            Ok(profiles) => {
                for profile in profiles {
                    if seen.insert(profile.token_address.clone()) {
                        mints.push(profile.token_address);
                    }
                }
            }
            Err(e) => debug!("Profile feed unavailable: {}", e),
        }

        mints.truncate(limit);
        Ok(mints)
    }

    async fn leader(&self) -> Result<Option<String>> {
        let boosts = self.top_boosts().await?;
        Ok(boosts
            .into_iter()
            .max_by(|a, b| {
                a.total_amount
                    .unwrap_or(0.0)
                    .partial_cmp(&b.total_amount.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|b| b.token_address))
    }

    async fn momentum_mode(&self) -> Result<bool> {
        let Some(leader) = self.leader().await? else {
            return Ok(false);
        };
        let row = self.focus(&leader).await?;
        Ok(row.change_5m >= self.momentum_change_pct)
    }
}
