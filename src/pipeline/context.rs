//! Per-tick sell context and decision types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::position::{Position, TickState};
use crate::strategy::{NetProceeds, PanelSnapshot, RugSignal};

/// What to do with the position this tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SellAction {
    None,
    /// Sell this percentage of the current size
    Partial(f64),
    All,
}

/// Decision strength; a decision can only be replaced by a stronger one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Discretionary: partial profit taking, fades, volatility
    Soft,
    /// Profit target and lock exits
    Normal,
    /// Rug-reasoned exits; never vetoed
    Urgent,
    /// Stop losses and liquidation; never vetoed or replaced
    Hard,
}

/// Take-profit stage recorded once the partial fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Milestone {
    Tp1,
    Tp2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellDecision {
    pub action: SellAction,
    pub reason: String,
    pub priority: Priority,
    pub milestone: Option<Milestone>,
}

impl SellDecision {
    pub fn hold() -> Self {
        Self {
            action: SellAction::None,
            reason: String::new(),
            priority: Priority::Soft,
            milestone: None,
        }
    }

    pub fn sell_all(priority: Priority, reason: impl Into<String>) -> Self {
        Self {
            action: SellAction::All,
            reason: reason.into(),
            priority,
            milestone: None,
        }
    }

    pub fn sell_partial(pct: f64, priority: Priority, reason: impl Into<String>) -> Self {
        Self {
            action: SellAction::Partial(pct.clamp(0.0, 100.0)),
            reason: reason.into(),
            priority,
            milestone: None,
        }
    }

    pub fn with_milestone(mut self, milestone: Milestone) -> Self {
        self.milestone = Some(milestone);
        self
    }

    pub fn is_exit(&self) -> bool {
        !matches!(self.action, SellAction::None)
    }

    pub fn is_hard_stop(&self) -> bool {
        self.is_exit() && self.priority == Priority::Hard
    }

    /// Urgent or hard exits pass every gate
    pub fn is_protected(&self) -> bool {
        self.is_exit() && self.priority >= Priority::Urgent
    }
}

impl std::fmt::Display for SellDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.action {
            SellAction::None => write!(f, "hold"),
            SellAction::Partial(pct) => {
                write!(f, "sell {:.0}% [{:?}] {}", pct, self.priority, self.reason)
            }
            SellAction::All => write!(f, "sell all [{:?}] {}", self.priority, self.reason),
        }
    }
}

/// Fresh valuation of the position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub proceeds: NetProceeds,
    /// Net value per unit held
    pub unit_price: f64,
    pub pnl_pct: f64,
    /// The exit leg could not be quoted at all
    pub unquotable: bool,
}

impl Valuation {
    pub fn net_sol(&self) -> f64 {
        self.proceeds.net_sol
    }
}

/// Shared state the policies read and write during one tick
#[derive(Debug, Clone)]
pub struct SellContext {
    pub now: DateTime<Utc>,
    pub position: Position,
    /// Working copy of the tick bookkeeping, committed after the run
    pub tick: TickState,
    pub valuation: Valuation,
    pub target_pct: f64,
    pub elapsed_min: f64,
    pub risk: RugSignal,
    pub panel: Option<PanelSnapshot>,
    /// Price-change slope per minute from the signal history
    pub price_slope: f64,
    /// Net value change since the previous tick, percent
    pub value_change_pct: Option<f64>,
    pub rug_mode: bool,
    pub force_reasons: Vec<String>,
    pub decision: SellDecision,
    /// Policies that changed the decision, in order
    pub trace: Vec<String>,
    halted: bool,
}

impl SellContext {
    pub fn new(
        now: DateTime<Utc>,
        position: Position,
        valuation: Valuation,
        risk: RugSignal,
        panel: Option<PanelSnapshot>,
        price_slope: f64,
    ) -> Self {
        let value_change_pct = position
            .tick
            .last_value_sol
            .filter(|v| *v > 0.0)
            .map(|prev| (valuation.net_sol() - prev) / prev * 100.0);
        Self {
            now,
            tick: position.tick.clone(),
            elapsed_min: position.elapsed_minutes(now),
            position,
            valuation,
            target_pct: 0.0,
            risk,
            panel,
            price_slope,
            value_change_pct,
            rug_mode: false,
            force_reasons: Vec::new(),
            decision: SellDecision::hold(),
            trace: Vec::new(),
            halted: false,
        }
    }

    pub fn pnl_pct(&self) -> f64 {
        self.valuation.pnl_pct
    }

    /// Offer a decision; accepted over a hold or a weaker decision
    pub fn propose(&mut self, policy: &str, decision: SellDecision) -> bool {
        let current = &self.decision;
        let accept = !current.is_exit() || decision.priority > current.priority;
        if accept {
            debug!(
                mint = %self.position.mint,
                policy,
                from = %current,
                to = %decision,
                "Decision changed"
            );
            self.trace.push(format!("{}: {}", policy, decision));
            self.decision = decision;
        }
        accept
    }

    /// Suppress the current exit unless it is urgent or hard
    pub fn veto(&mut self, policy: &str, reason: &str) -> bool {
        if !self.decision.is_exit() || self.decision.is_protected() {
            return false;
        }
        debug!(
            mint = %self.position.mint,
            policy,
            vetoed = %self.decision,
            reason,
            "Exit vetoed"
        );
        self.trace.push(format!("{}: veto {} ({})", policy, self.decision, reason));
        self.decision = SellDecision::hold();
        true
    }

    /// Stop running further policies this tick
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::EntryMode;

    fn context() -> SellContext {
        let now = Utc::now();
        let position = Position::provisional("M", 1.0, 1000.0, 6, EntryMode::Momentum, now);
        let valuation = Valuation {
            proceeds: NetProceeds {
                gross_sol: 1.0,
                platform_fee_sol: 0.0,
                fee_applied: false,
                fixed_costs_sol: 0.0,
                net_sol: 1.0,
            },
            unit_price: 0.001,
            pnl_pct: 0.0,
            unquotable: false,
        };
        SellContext::new(now, position, valuation, RugSignal::default(), None, 0.0)
    }

    #[test]
    fn test_hard_stop_cannot_be_downgraded() {
        let mut ctx = context();
        assert!(ctx.propose("ladder", SellDecision::sell_all(Priority::Hard, "HARD_STOP")));
        assert!(!ctx.propose("tp", SellDecision::sell_partial(40.0, Priority::Soft, "TP1")));
        assert!(!ctx.propose("lock", SellDecision::sell_all(Priority::Normal, "PROFIT_LOCK")));
        assert!(!ctx.propose("rug", SellDecision::sell_all(Priority::Urgent, "RUG")));
        assert!(!ctx.veto("floor", "below floor"));
        assert!(ctx.decision.is_hard_stop());
        assert_eq!(ctx.decision.reason, "HARD_STOP");
    }

    #[test]
    fn test_soft_decision_upgraded_and_vetoed() {
        let mut ctx = context();
        ctx.propose("tp", SellDecision::sell_partial(40.0, Priority::Soft, "TP1"));
        assert!(ctx.propose("target", SellDecision::sell_all(Priority::Normal, "PNL_TARGET")));
        assert_eq!(ctx.decision.action, SellAction::All);
        assert!(ctx.veto("warming", "hold"));
        assert!(!ctx.decision.is_exit());
        assert_eq!(ctx.trace.len(), 3);
    }

    #[test]
    fn test_value_change_from_last_tick() {
        let mut ctx = context();
        assert!(ctx.value_change_pct.is_none());
        let mut position = ctx.position.clone();
        position.tick.last_value_sol = Some(1.25);
        ctx = SellContext::new(ctx.now, position, ctx.valuation, RugSignal::default(), None, 0.0);
        assert!((ctx.value_change_pct.unwrap() + 20.0).abs() < 1e-9);
    }
}
