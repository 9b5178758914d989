//! Position management
//!
//! Owns the single open position, its lifecycle phase and its persisted
//! record. At most one position exists at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::persist::StateStore;
use crate::strategy::{EntryMode, FadeTracker};

/// Lifecycle phase of the engine's single slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Observing,
    PendingCredit,
    Holding,
    Selling,
    Closed,
}

impl Phase {
    /// Phases in which an asset is committed
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::PendingCredit | Phase::Holding | Phase::Selling)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Observing => "observing",
            Phase::PendingCredit => "pending_credit",
            Phase::Holding => "holding",
            Phase::Selling => "selling",
            Phase::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Minimum-profit hold applied to warm-ride entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmingHold {
    pub active: bool,
    pub started_at: Option<DateTime<Utc>>,
}

/// Per-tick bookkeeping written back by the sell pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickState {
    /// High-water-mark net value, SOL
    pub hwm_value_sol: f64,
    /// High-water-mark value per unit
    pub hwm_unit_price: f64,
    pub last_value_sol: Option<f64>,
    pub warming: WarmingHold,
    pub fade: FadeTracker,
    /// Consecutive observer-confirmed drops
    pub plummet_strikes: u32,
    /// Consecutive ticks with a loss-side slip
    pub slip_streak: u32,
    /// Locked-in minimum PnL once armed
    pub profit_lock_pct: Option<f64>,
    pub rebound_defer_since: Option<DateTime<Utc>>,
    pub trail_armed: bool,
    pub tp1_done: bool,
    pub tp2_done: bool,
}

/// The single open holding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub mint: String,
    /// Quantity held, provisional while `awaiting_size_sync`
    pub size_ui: f64,
    /// Cumulative cost in SOL, never lowered while open
    pub cost_basis_sol: f64,
    /// Proceeds already taken by partial sells
    pub realized_sol: f64,
    pub decimals: u8,
    pub acquired_at: DateTime<Utc>,
    pub last_buy_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub awaiting_size_sync: bool,
    pub entry_mode: EntryMode,
    /// Transaction that opened the position
    pub entry_tx: Option<String>,
    #[serde(default)]
    pub tick: TickState,
}

impl Position {
    /// Optimistic record created at buy submission
    pub fn provisional(
        mint: &str,
        cost_sol: f64,
        expected_size_ui: f64,
        decimals: u8,
        entry_mode: EntryMode,
        now: DateTime<Utc>,
    ) -> Self {
        let warming = if entry_mode == EntryMode::WarmRide {
            WarmingHold {
                active: true,
                started_at: Some(now),
            }
        } else {
            WarmingHold::default()
        };
        Self {
            mint: mint.to_string(),
            size_ui: expected_size_ui,
            cost_basis_sol: cost_sol,
            realized_sol: 0.0,
            decimals,
            acquired_at: now,
            last_buy_at: now,
            last_seen_at: now,
            awaiting_size_sync: true,
            entry_mode,
            entry_tx: None,
            tick: TickState {
                warming,
                ..TickState::default()
            },
        }
    }

    /// `(net value + realized - cost) / cost`, percent
    pub fn pnl_pct(&self, net_value_sol: f64) -> f64 {
        if self.cost_basis_sol <= 0.0 {
            return 0.0;
        }
        (net_value_sol + self.realized_sol - self.cost_basis_sol) / self.cost_basis_sol * 100.0
    }

    pub fn unit_price(&self, value_sol: f64) -> f64 {
        if self.size_ui <= 0.0 {
            return 0.0;
        }
        value_sol / self.size_ui
    }

    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.acquired_at).num_milliseconds().max(0) as f64 / 60_000.0
    }
}

#[derive(Debug, Default)]
struct Slot {
    phase: Phase,
    observing: Option<String>,
    position: Option<Position>,
}

/// Position manager
pub struct PositionManager {
    slot: Arc<RwLock<Slot>>,
    store: Arc<StateStore>,
}

impl PositionManager {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Slot::default())),
            store,
        }
    }

    /// Restore the persisted position, if any
    pub async fn restore(&self) -> Option<Position> {
        let position = self.store.position().await?;
        let mut slot = self.slot.write().await;
        slot.phase = if position.awaiting_size_sync {
            Phase::PendingCredit
        } else {
            Phase::Holding
        };
        slot.position = Some(position.clone());
        info!(
            mint = %position.mint,
            phase = %slot.phase,
            size = position.size_ui,
            cost_sol = position.cost_basis_sol,
            "Restored position"
        );
        Some(position)
    }

    async fn persist(&self, position: Option<Position>) -> Result<()> {
        self.store.save_position(position).await
    }

    pub async fn phase(&self) -> Phase {
        self.slot.read().await.phase
    }

    pub async fn snapshot(&self) -> Option<Position> {
        self.slot.read().await.position.clone()
    }

    pub async fn observing(&self) -> Option<String> {
        self.slot.read().await.observing.clone()
    }

    /// Idle/Closed/Observing -> Observing
    pub async fn observe(&self, mint: &str) -> Result<()> {
        let mut slot = self.slot.write().await;
        match slot.phase {
            Phase::Idle | Phase::Closed | Phase::Observing => {
                if slot.observing.as_deref() != Some(mint) {
                    debug!(mint = %mint, "Observing");
                }
                slot.phase = Phase::Observing;
                slot.observing = Some(mint.to_string());
                Ok(())
            }
            from => Err(Error::InvalidTransition {
                from: from.to_string(),
                via: "observe",
            }),
        }
    }

    /// Observing -> Idle
    pub async fn stop_observing(&self) {
        let mut slot = self.slot.write().await;
        if slot.phase == Phase::Observing {
            slot.phase = Phase::Idle;
            slot.observing = None;
        }
    }

    /// Create the provisional position at buy submission
    pub async fn open_provisional(
        &self,
        mut position: Position,
        tx_ref: &str,
    ) -> Result<Position> {
        let mut slot = self.slot.write().await;
        if let Some(existing) = &slot.position {
            return Err(Error::PositionExists(existing.mint.clone()));
        }
        if slot.phase.is_active() {
            return Err(Error::InvalidTransition {
                from: slot.phase.to_string(),
                via: "open_provisional",
            });
        }

        position.entry_tx = Some(tx_ref.to_string());
        position.awaiting_size_sync = true;
        slot.position = Some(position.clone());
        slot.phase = Phase::PendingCredit;
        slot.observing = None;
        drop(slot);

        info!(
            mint = %position.mint,
            cost_sol = position.cost_basis_sol,
            expected_size = position.size_ui,
            tx = %tx_ref,
            "Provisional position opened"
        );
        self.persist(Some(position.clone())).await?;
        Ok(position)
    }

    /// Confirm an observed credit; size only ever grows
    pub async fn confirm_credit(
        &self,
        mint: &str,
        credited_ui: f64,
        decimals: u8,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        let mut slot = self.slot.write().await;
        let position = match slot.position.as_mut() {
            Some(p) if p.mint == mint => p,
            Some(p) => return Err(Error::PositionExists(p.mint.clone())),
            None => return Err(Error::NoPosition),
        };

        let previous = position.size_ui;
        if position.awaiting_size_sync {
            // Provisional size is not trusted: the observed credit wins
            position.size_ui = credited_ui;
        } else {
            position.size_ui = position.size_ui.max(credited_ui);
        }
        position.decimals = decimals;
        position.awaiting_size_sync = false;
        position.last_seen_at = now;
        let updated = position.clone();
        if slot.phase == Phase::PendingCredit {
            slot.phase = Phase::Holding;
        }
        drop(slot);

        info!(
            mint = %mint,
            previous_size = previous,
            size = updated.size_ui,
            cost_sol = updated.cost_basis_sol,
            "Credit confirmed"
        );
        self.persist(Some(updated.clone())).await?;
        Ok(updated)
    }

    /// Write back per-tick bookkeeping
    pub async fn commit_tick(&self, mint: &str, tick: TickState, now: DateTime<Utc>) -> Result<()> {
        let mut slot = self.slot.write().await;
        let position = match slot.position.as_mut() {
            Some(p) if p.mint == mint => p,
            _ => return Err(Error::NoPosition),
        };
        position.tick = tick;
        position.last_seen_at = now;
        let updated = position.clone();
        drop(slot);
        self.persist(Some(updated)).await
    }

    /// Holding -> Selling
    pub async fn begin_selling(&self, mint: &str) -> Result<Position> {
        let mut slot = self.slot.write().await;
        match (&slot.position, slot.phase) {
            (Some(p), Phase::Holding) if p.mint == mint => {
                let position = p.clone();
                slot.phase = Phase::Selling;
                Ok(position)
            }
            (Some(p), Phase::Selling) if p.mint == mint => Ok(p.clone()),
            (None, _) => Err(Error::NoPosition),
            (_, from) => Err(Error::InvalidTransition {
                from: from.to_string(),
                via: "begin_selling",
            }),
        }
    }

    /// Selling -> Holding without a fill
    pub async fn abort_selling(&self) {
        let mut slot = self.slot.write().await;
        if slot.phase == Phase::Selling && slot.position.is_some() {
            slot.phase = Phase::Holding;
        }
    }

    /// Record a partial sell: size shrinks, proceeds accrue, cost stays
    pub async fn apply_partial(
        &self,
        mint: &str,
        remaining_ui: f64,
        proceeds_sol: f64,
    ) -> Result<Position> {
        let mut slot = self.slot.write().await;
        let position = match slot.position.as_mut() {
            Some(p) if p.mint == mint => p,
            _ => return Err(Error::NoPosition),
        };
        position.size_ui = remaining_ui.max(0.0);
        position.realized_sol += proceeds_sol.max(0.0);
        let updated = position.clone();
        slot.phase = Phase::Holding;
        drop(slot);

        info!(
            mint = %mint,
            remaining = updated.size_ui,
            realized_sol = updated.realized_sol,
            "Partial sell applied"
        );
        self.persist(Some(updated.clone())).await?;
        Ok(updated)
    }

    /// Fully exited or verified empty on chain
    pub async fn close(&self, mint: &str, reason: &str) -> Result<Option<Position>> {
        let mut slot = self.slot.write().await;
        let closed = match &slot.position {
            Some(p) if p.mint == mint => slot.position.take(),
            Some(_) => return Err(Error::PositionExists(mint.to_string())),
            None => None,
        };
        slot.phase = Phase::Closed;
        slot.observing = None;
        drop(slot);

        if let Some(p) = &closed {
            info!(
                mint = %mint,
                reason = %reason,
                cost_sol = p.cost_basis_sol,
                realized_sol = p.realized_sol,
                "Position closed"
            );
        }
        self.persist(None).await?;
        Ok(closed)
    }

    /// Drop a provisional position whose credit never arrived
    pub async fn purge(&self, mint: &str) -> Result<()> {
        let mut slot = self.slot.write().await;
        match &slot.position {
            Some(p) if p.mint == mint && p.awaiting_size_sync => {
                slot.position = None;
                slot.phase = Phase::Idle;
            }
            Some(p) if p.mint == mint => {
                warn!(mint = %mint, "Refusing to purge a confirmed position");
                return Ok(());
            }
            _ => return Ok(()),
        }
        drop(slot);
        warn!(mint = %mint, "Provisional position purged");
        self.persist(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PositionManager {
        PositionManager::new(Arc::new(StateStore::in_memory()))
    }

    fn provisional(mint: &str, cost: f64) -> Position {
        Position::provisional(mint, cost, 1000.0, 6, EntryMode::Momentum, Utc::now())
    }

    #[test]
    fn test_pnl_includes_realized() {
        let mut p = provisional("M", 1.0);
        assert!((p.pnl_pct(1.05) - 5.0).abs() < 1e-9);
        p.realized_sol = 0.5;
        assert!((p.pnl_pct(0.55) - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let pm = manager();
        pm.observe("M").await.unwrap();
        assert_eq!(pm.phase().await, Phase::Observing);

        pm.open_provisional(provisional("M", 1.0), "tx1").await.unwrap();
        assert_eq!(pm.phase().await, Phase::PendingCredit);

        let p = pm.confirm_credit("M", 990.0, 6, Utc::now()).await.unwrap();
        assert_eq!(p.size_ui, 990.0);
        assert!(!p.awaiting_size_sync);
        assert_eq!(pm.phase().await, Phase::Holding);

        pm.begin_selling("M").await.unwrap();
        assert_eq!(pm.phase().await, Phase::Selling);
        pm.close("M", "test").await.unwrap();
        assert_eq!(pm.phase().await, Phase::Closed);
        assert!(pm.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_single_position_invariant() {
        let pm = manager();
        pm.open_provisional(provisional("A", 1.0), "tx1").await.unwrap();
        let err = pm
            .open_provisional(provisional("B", 1.0), "tx2")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PositionExists(m) if m == "A"));
        assert!(pm.observe("B").await.is_err());

        // Every interleaving of these ops leaves at most one active asset
        let ops = ["open:C", "confirm:A", "open:D", "sell:A", "partial:A", "close:A", "open:E", "purge:E", "open:F"];
        for op in ops {
            let (kind, mint) = op.split_once(':').unwrap();
            let _ = match kind {
                "open" => pm.open_provisional(provisional(mint, 1.0), "tx").await.map(|_| ()),
                "confirm" => pm.confirm_credit(mint, 1000.0, 6, Utc::now()).await.map(|_| ()),
                "sell" => pm.begin_selling(mint).await.map(|_| ()),
                "partial" => pm.apply_partial(mint, 500.0, 0.5).await.map(|_| ()),
                "close" => pm.close(mint, "test").await.map(|_| ()),
                "purge" => pm.purge(mint).await,
                _ => unreachable!(),
            };
            let phase = pm.phase().await;
            let position = pm.snapshot().await;
            if phase.is_active() {
                assert!(position.is_some(), "{} left {} without a position", op, phase);
            }
        }
        assert_eq!(pm.snapshot().await.unwrap().mint, "F");
    }

    #[tokio::test]
    async fn test_cost_basis_monotonic() {
        let pm = manager();
        pm.open_provisional(provisional("M", 1.0), "tx").await.unwrap();
        let mut last_cost = pm.snapshot().await.unwrap().cost_basis_sol;

        pm.confirm_credit("M", 1000.0, 6, Utc::now()).await.unwrap();
        pm.confirm_credit("M", 400.0, 6, Utc::now()).await.unwrap();
        let p = pm.snapshot().await.unwrap();
        // A smaller late reading never shrinks a confirmed size
        assert_eq!(p.size_ui, 1000.0);
        assert!(p.cost_basis_sol >= last_cost);
        last_cost = p.cost_basis_sol;

        pm.apply_partial("M", 600.0, 0.3).await.unwrap();
        pm.commit_tick("M", TickState::default(), Utc::now()).await.unwrap();
        let p = pm.snapshot().await.unwrap();
        assert!(p.cost_basis_sol >= last_cost);
        assert_eq!(p.realized_sol, 0.3);
        assert_eq!(p.size_ui, 600.0);
    }

    #[tokio::test]
    async fn test_purge_only_provisional() {
        let pm = manager();
        pm.open_provisional(provisional("M", 1.0), "tx").await.unwrap();
        pm.purge("M").await.unwrap();
        assert!(pm.snapshot().await.is_none());
        assert_eq!(pm.phase().await, Phase::Idle);

        pm.open_provisional(provisional("N", 1.0), "tx").await.unwrap();
        pm.confirm_credit("N", 10.0, 6, Utc::now()).await.unwrap();
        pm.purge("N").await.unwrap();
        assert!(pm.snapshot().await.is_some());
    }

    #[tokio::test]
    async fn test_restore_from_store() {
        let store = Arc::new(StateStore::in_memory());
        let pm = PositionManager::new(store.clone());
        pm.open_provisional(provisional("M", 1.0), "tx").await.unwrap();

        let restored = PositionManager::new(store);
        let p = restored.restore().await.unwrap();
        assert_eq!(p.entry_tx.as_deref(), Some("tx"));
        assert_eq!(restored.phase().await, Phase::PendingCredit);
    }
}
