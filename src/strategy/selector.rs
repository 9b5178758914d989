//! Candidate Selector
//!
//! Ranks discoverable assets (or follows the external leader) and holds the
//! choice for a sticky cooldown. A prefetch loop keeps a ranked pick warm so
//! the decision tick reads it without waiting on the panel.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::trigger::TriggerEvaluator;
use super::types::{PanelSnapshot, SelectionMode, SignalSample};
use crate::config::SelectionConfig;
use crate::error::Result;
use crate::registry::LockRegistry;
use crate::services::SignalPanel;
use crate::signals::SignalHistory;

/// A ranked candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    pub mint: String,
    pub score: f64,
    pub panel: PanelSnapshot,
    pub mode: SelectionMode,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SelectorState {
    /// Current sticky choice and when it was made
    current: Option<(Pick, DateTime<Utc>)>,
    /// Latest prefetched ranking result
    prefetched: Option<Pick>,
}

pub struct CandidateSelector {
    config: SelectionConfig,
    panel: Arc<dyn SignalPanel>,
    history: Arc<SignalHistory>,
    trigger: Arc<TriggerEvaluator>,
    registry: Arc<LockRegistry>,
    state: RwLock<SelectorState>,
}

impl CandidateSelector {
    pub fn new(
        config: SelectionConfig,
        panel: Arc<dyn SignalPanel>,
        history: Arc<SignalHistory>,
        trigger: Arc<TriggerEvaluator>,
        registry: Arc<LockRegistry>,
    ) -> Self {
        Self {
            config,
            panel,
            history,
            trigger,
            registry,
            state: RwLock::new(SelectorState::default()),
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.config.mode
    }

    /// Composite ranking score
    pub fn score(&self, panel: &PanelSnapshot, readiness: f64) -> f64 {
        self.config.weight_badge * panel.badge.weight()
            + self.config.weight_score * panel.score
            + self.config.weight_liquidity * panel.liquidity_usd.max(0.0).ln_1p()
            + self.config.weight_volume * panel.volume_1h.max(0.0).ln_1p()
            + self.config.weight_readiness * readiness
    }

    /// Fetch a row, record it into history and score it
    async fn observe(&self, mint: &str, now: DateTime<Utc>) -> Result<Pick> {
        let panel = self.panel.focus(mint).await?;
        self.history
            .record(mint, SignalSample::from_panel(now, &panel));
        self.registry.observe_badge(mint, panel.badge, now);
        let readiness = self.trigger.readiness(mint, &self.history);
        Ok(Pick {
            mint: mint.to_string(),
            score: self.score(&panel, readiness),
            panel,
            mode: self.config.mode,
            computed_at: now,
        })
    }

    /// Compute a fresh ranking without touching the sticky choice
    pub async fn rank(&self, now: DateTime<Utc>) -> Result<Option<Pick>> {
        match self.config.mode {
            SelectionMode::TopN => {
                let mints: Vec<String> = self
                    .panel
                    .discover(self.config.top_n)
                    .await?
                    .into_iter()
                    .filter(|m| self.registry.is_banned(m, now).is_none())
                    .collect();
                let observed = join_all(mints.iter().map(|m| self.observe(m, now))).await;

                let mut best: Option<Pick> = None;
                for (mint, result) in mints.iter().zip(observed) {
                    let pick = match result {
                        Ok(pick) => pick,
                        Err(e) => {
                            debug!(mint = %mint, "Skipping candidate: {}", e);
                            continue;
                        }
                    };
                    if best.as_ref().map(|b| pick.score > b.score).unwrap_or(true) {
                        best = Some(pick);
                    }
                }
                Ok(best)
            }
            SelectionMode::Leader => {
                if !self.panel.momentum_mode().await? {
                    return Ok(None);
                }
                let Some(leader) = self.panel.leader().await? else {
                    return Ok(None);
                };
                if self.registry.is_banned(&leader, now).is_some() {
                    return Ok(None);
                }
                Ok(Some(self.observe(&leader, now).await?))
            }
        }
    }

    /// One prefetch pass
    pub async fn prefetch(&self, now: DateTime<Utc>) -> Result<()> {
        let pick = self.rank(now).await?;
        self.state.write().await.prefetched = pick;
        Ok(())
    }

    /// Record a sample for an asset outside the ranking (e.g. the held one)
    pub async fn refresh(&self, mint: &str, now: DateTime<Utc>) -> Result<PanelSnapshot> {
        Ok(self.observe(mint, now).await?.panel)
    }

    /// The pick to act on now
    ///
    /// Returns the sticky choice while its cooldown runs, otherwise the
    /// prefetched ranking when fresh, otherwise a synchronous ranking.
    pub async fn select(&self, now: DateTime<Utc>) -> Result<Option<Pick>> {
        let sticky = Duration::milliseconds(self.config.sticky_ms as i64);
        let staleness = Duration::milliseconds(self.config.staleness_ms as i64);

        {
            let state = self.state.read().await;
            if let Some((pick, chosen_at)) = &state.current {
                if now - *chosen_at < sticky && self.registry.is_banned(&pick.mint, now).is_none()
                {
                    return Ok(Some(pick.clone()));
                }
            }
        }

        let prefetched = {
            let state = self.state.read().await;
            state
                .prefetched
                .clone()
                .filter(|p| now - p.computed_at <= staleness)
                .filter(|p| self.registry.is_banned(&p.mint, now).is_none())
        };

        let pick = match prefetched {
            Some(pick) => Some(pick),
            None => {
                debug!("Prefetch miss, ranking synchronously");
                self.rank(now).await?
            }
        };

        let mut state = self.state.write().await;
        let previous = state.current.as_ref().map(|(p, _)| p.mint.clone());
        state.current = pick.clone().map(|p| (p, now));
        if let Some(p) = &pick {
            if previous.as_deref() != Some(p.mint.as_str()) {
                info!(mint = %p.mint, score = p.score, mode = %p.mode, "Candidate selected");
            }
        }
        Ok(pick)
    }

    /// Drop the sticky choice (after a buy or a ban)
    pub async fn clear(&self) {
        self.state.write().await.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SafetyConfig, TriggerConfig};
    use crate::services::mock::MockPanel;
    use crate::strategy::Badge;

    fn row(score: f64, badge: Badge) -> PanelSnapshot {
        PanelSnapshot {
            score,
            liquidity_usd: 20_000.0,
            volume_1h: 10_000.0,
            change_5m: 3.0,
            change_1h: 5.0,
            badge,
        }
    }

    fn selector(panel: Arc<MockPanel>, mode: SelectionMode) -> (CandidateSelector, Arc<LockRegistry>) {
        let registry = Arc::new(LockRegistry::new(SafetyConfig::default()));
        let config = SelectionConfig {
            mode,
            ..SelectionConfig::default()
        };
        let selector = CandidateSelector::new(
            config,
            panel,
            Arc::new(SignalHistory::new(50)),
            Arc::new(TriggerEvaluator::new(TriggerConfig::default())),
            registry.clone(),
        );
        (selector, registry)
    }

    #[tokio::test]
    async fn test_top_n_picks_best_badge() {
        let panel = Arc::new(MockPanel::new());
        panel.set("calm", row(50.0, Badge::Calm));
        panel.set("hot", row(50.0, Badge::Pumping));
        panel.set_discovered(&["calm", "hot"]);
        let (selector, _) = selector(panel, SelectionMode::TopN);

        let pick = selector.select(Utc::now()).await.unwrap().unwrap();
        assert_eq!(pick.mint, "hot");
    }

    #[tokio::test]
    async fn test_sticky_choice_holds_until_cooldown() {
        let panel = Arc::new(MockPanel::new());
        panel.set("a", row(50.0, Badge::Pumping));
        panel.set("b", row(10.0, Badge::Pumping));
        panel.set_discovered(&["a", "b"]);
        let (selector, _) = selector(panel.clone(), SelectionMode::TopN);

        let t0 = Utc::now();
        assert_eq!(selector.select(t0).await.unwrap().unwrap().mint, "a");

        // Ranking flips but the choice is sticky
        panel.set("b", row(500.0, Badge::Pumping));
        let held = selector.select(t0 + Duration::seconds(3)).await.unwrap().unwrap();
        assert_eq!(held.mint, "a");

        let after = selector.select(t0 + Duration::seconds(9)).await.unwrap().unwrap();
        assert_eq!(after.mint, "b");
    }

    #[tokio::test]
    async fn test_banned_assets_are_skipped() {
        let panel = Arc::new(MockPanel::new());
        panel.set("a", row(50.0, Badge::Pumping));
        panel.set("b", row(10.0, Badge::Pumping));
        panel.set_discovered(&["a", "b"]);
        let (selector, registry) = selector(panel, SelectionMode::TopN);

        let now = Utc::now();
        registry.blacklist("a", "test", now);
        assert_eq!(selector.select(now).await.unwrap().unwrap().mint, "b");
    }

    #[tokio::test]
    async fn test_leader_requires_momentum_mode() {
        let panel = Arc::new(MockPanel::new());
        panel.set("lead", row(5.0, Badge::Warming));
        panel.set_leader(Some("lead"), false);
        let (selector, _) = selector(panel.clone(), SelectionMode::Leader);

        let now = Utc::now();
        assert!(selector.select(now).await.unwrap().is_none());

        panel.set_leader(Some("lead"), true);
        let pick = selector.select(now).await.unwrap().unwrap();
        assert_eq!(pick.mint, "lead");
        assert_eq!(pick.mode, SelectionMode::Leader);
    }

    #[tokio::test]
    async fn test_stale_prefetch_is_a_miss() {
        let panel = Arc::new(MockPanel::new());
        panel.set("a", row(50.0, Badge::Pumping));
        panel.set_discovered(&["a"]);
        let (selector, _) = selector(panel.clone(), SelectionMode::TopN);

        let t0 = Utc::now();
        selector.prefetch(t0).await.unwrap();
        let calls = panel.focus_calls.load(std::sync::atomic::Ordering::SeqCst);

        // Fresh prefetch is served without a panel call
        selector.select(t0 + Duration::milliseconds(500)).await.unwrap();
        assert_eq!(panel.focus_calls.load(std::sync::atomic::Ordering::SeqCst), calls);

        // Past sticky and staleness: synchronous ranking
        selector.select(t0 + Duration::seconds(20)).await.unwrap();
        assert!(panel.focus_calls.load(std::sync::atomic::Ordering::SeqCst) > calls);
    }
}
