//! Rug-mode policies
//!
//! Run after the calm policies when a force condition is set. Order matters:
//! exits are proposed first, then the hold overrides and gates get a chance
//! to defer or veto anything that is not urgent or hard.

use chrono::Duration;
use tracing::{debug, info};

use super::context::{Milestone, Priority, SellContext, SellDecision};
use super::SellPolicy;
use crate::config::SellConfig;

/// Sharp drop across the last few samples
pub struct EarlyFadePolicy {
    drop_pct: f64,
}

impl EarlyFadePolicy {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            drop_pct: config.early_fade_drop_pct,
        }
    }
}

impl SellPolicy for EarlyFadePolicy {
    fn name(&self) -> &'static str {
        "early_fade"
    }

    fn apply(&self, ctx: &mut SellContext) {
        let drop = ctx.tick.fade.recent_drop();
        if drop >= self.drop_pct && ctx.tick.fade.falling_for(2) {
            let reason = format!("EARLY_FADE dropped {:.2} points", drop);
            ctx.propose(self.name(), SellDecision::sell_all(Priority::Urgent, reason));
        }
    }
}

/// Drop confirmed across several consecutive samples
pub struct ObserverDropPolicy {
    drop_pct: f64,
    samples: usize,
}

impl ObserverDropPolicy {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            drop_pct: config.observer_drop_pct,
            samples: config.observer_samples,
        }
    }
}

impl SellPolicy for ObserverDropPolicy {
    fn name(&self) -> &'static str {
        "observer_drop"
    }

    fn apply(&self, ctx: &mut SellContext) {
        let fade = &ctx.tick.fade;
        if !fade.falling_for(self.samples) {
            return;
        }
        let len = fade.recent.len();
        let (Some(start), Some(latest)) = (fade.recent.get(len - self.samples - 1), fade.recent.back())
        else {
            return;
        };
        let drop = start - latest;
        if drop >= self.drop_pct {
            let reason = format!("OBSERVER_DROP {:.2} points over {} samples", drop, self.samples);
            ctx.propose(self.name(), SellDecision::sell_all(Priority::Soft, reason));
        }
    }
}

/// Wild swings with PnL sitting in the lower half of the range
pub struct VolatilityGuardPolicy {
    swing_pct: f64,
}

impl VolatilityGuardPolicy {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            swing_pct: config.volatility_swing_pct,
        }
    }
}

impl SellPolicy for VolatilityGuardPolicy {
    fn name(&self) -> &'static str {
        "volatility_guard"
    }

    fn apply(&self, ctx: &mut SellContext) {
        let fade = &ctx.tick.fade;
        let swing = fade.recent_swing();
        if swing < self.swing_pct {
            return;
        }
        let high = fade.recent.iter().copied().fold(f64::MIN, f64::max);
        let mid = high - swing / 2.0;
        if ctx.pnl_pct() < mid {
            let reason = format!("VOLATILITY swing {:.2} points", swing);
            ctx.propose(self.name(), SellDecision::sell_all(Priority::Soft, reason));
        }
    }
}

/// Hard stop, staged take-profits and a trailing stop once armed
pub struct FastExitLadder {
    hard_stop_pct: f64,
    tp1_pct: f64,
    tp1_sell_pct: f64,
    tp2_pct: f64,
    tp2_sell_pct: f64,
    trail_arm_pct: f64,
    trail_pct: f64,
}

impl FastExitLadder {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            hard_stop_pct: config.hard_stop_pct,
            tp1_pct: config.tp1_pct,
            tp1_sell_pct: config.tp1_sell_pct,
            tp2_pct: config.tp2_pct,
            tp2_sell_pct: config.tp2_sell_pct,
            trail_arm_pct: config.trail_arm_pct,
            trail_pct: config.trail_pct,
        }
    }
}

impl SellPolicy for FastExitLadder {
    fn name(&self) -> &'static str {
        "fast_exit"
    }

    fn apply(&self, ctx: &mut SellContext) {
        let pnl = ctx.pnl_pct();

        if pnl <= -self.hard_stop_pct {
            let reason = format!("HARD_STOP pnl {:.2}% <= -{:.2}%", pnl, self.hard_stop_pct);
            ctx.propose(self.name(), SellDecision::sell_all(Priority::Hard, reason));
            ctx.halt();
            return;
        }

        if pnl >= self.trail_arm_pct && !ctx.tick.trail_armed {
            debug!(mint = %ctx.position.mint, pnl, "Trailing stop armed");
            ctx.tick.trail_armed = true;
        }
        if ctx.tick.trail_armed && ctx.tick.hwm_value_sol > 0.0 {
            let trigger = ctx.tick.hwm_value_sol * (1.0 - self.trail_pct / 100.0);
            if ctx.valuation.net_sol() <= trigger {
                let reason = format!(
                    "TRAILING_STOP value {:.6} <= {:.6} ({:.1}% off high)",
                    ctx.valuation.net_sol(),
                    trigger,
                    self.trail_pct
                );
                ctx.propose(self.name(), SellDecision::sell_all(Priority::Normal, reason));
                return;
            }
        }

        if pnl >= self.tp2_pct && !ctx.tick.tp2_done {
            let reason = format!("TP2 pnl {:.2}% >= {:.2}%", pnl, self.tp2_pct);
            ctx.propose(
                self.name(),
                SellDecision::sell_partial(self.tp2_sell_pct, Priority::Soft, reason)
                    .with_milestone(Milestone::Tp2),
            );
        } else if pnl >= self.tp1_pct && !ctx.tick.tp1_done {
            let reason = format!("TP1 pnl {:.2}% >= {:.2}%", pnl, self.tp1_pct);
            ctx.propose(
                self.name(),
                SellDecision::sell_partial(self.tp1_sell_pct, Priority::Soft, reason)
                    .with_milestone(Milestone::Tp1),
            );
        }
    }
}

/// Stop distance widened with market intensity
pub struct DynamicHardStop {
    min_pct: f64,
    max_pct: f64,
    swing_pct: f64,
}

impl DynamicHardStop {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            min_pct: config.dynamic_stop_min_pct,
            max_pct: config.dynamic_stop_max_pct,
            swing_pct: config.volatility_swing_pct,
        }
    }

    /// Stop distance for a market intensity in [0, 1]
    pub fn stop_pct(&self, intensity: f64) -> f64 {
        self.min_pct + (self.max_pct - self.min_pct) * intensity.clamp(0.0, 1.0)
    }
}

impl SellPolicy for DynamicHardStop {
    fn name(&self) -> &'static str {
        "dynamic_stop"
    }

    fn apply(&self, ctx: &mut SellContext) {
        if self.swing_pct <= 0.0 {
            return;
        }
        let swing = ctx.tick.fade.recent_swing();
        let change = ctx.panel.as_ref().map(|p| p.change_5m.abs()).unwrap_or(0.0);
        let intensity = (swing.max(change) / self.swing_pct).min(1.0);
        let stop = self.stop_pct(intensity);

        let pnl = ctx.pnl_pct();
        if pnl <= -stop {
            let reason = format!(
                "DYNAMIC_STOP pnl {:.2}% <= -{:.2}% (intensity {:.2})",
                pnl, stop, intensity
            );
            ctx.propose(self.name(), SellDecision::sell_all(Priority::Hard, reason));
        }
    }
}

/// Warm-ride entries must clear a decaying minimum profit before soft exits
pub struct WarmingHoldPolicy {
    min_pct: f64,
    decay_per_min: f64,
    max_secs: u64,
}

impl WarmingHoldPolicy {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            min_pct: config.warming_min_pct,
            decay_per_min: config.warming_decay_per_min,
            max_secs: config.warming_max_secs,
        }
    }

    pub fn required_pct(&self, age_min: f64) -> f64 {
        (self.min_pct - self.decay_per_min * age_min).max(0.0)
    }
}

impl SellPolicy for WarmingHoldPolicy {
    fn name(&self) -> &'static str {
        "warming_hold"
    }

    fn apply(&self, ctx: &mut SellContext) {
        if !ctx.tick.warming.active {
            return;
        }
        let started = ctx.tick.warming.started_at.unwrap_or(ctx.position.acquired_at);
        let age = ctx.now - started;
        if age >= Duration::seconds(self.max_secs as i64) {
            info!(mint = %ctx.position.mint, "Warming hold expired");
            ctx.tick.warming.active = false;
            return;
        }

        let required = self.required_pct(age.num_milliseconds() as f64 / 60_000.0);
        let pnl = ctx.pnl_pct();
        if pnl >= required {
            info!(mint = %ctx.position.mint, pnl, required, "Warming hold satisfied");
            ctx.tick.warming.active = false;
            return;
        }
        let reason = format!("pnl {:.2}% below warming minimum {:.2}%", pnl, required);
        ctx.veto(self.name(), &reason);
    }
}

/// Locks a share of the peak once armed; exits if PnL falls through it
pub struct ProfitLockPolicy {
    arm_pct: f64,
    keep_ratio: f64,
}

impl ProfitLockPolicy {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            arm_pct: config.profit_lock_arm_pct,
            keep_ratio: config.profit_lock_keep_ratio,
        }
    }
}

impl SellPolicy for ProfitLockPolicy {
    fn name(&self) -> &'static str {
        "profit_lock"
    }

    fn apply(&self, ctx: &mut SellContext) {
        let peak = ctx.tick.fade.peak_pnl_pct;
        if peak >= self.arm_pct {
            let lock = peak * self.keep_ratio;
            if ctx.tick.profit_lock_pct.map(|l| lock > l).unwrap_or(true) {
                debug!(mint = %ctx.position.mint, lock_pct = lock, "Profit lock raised");
                ctx.tick.profit_lock_pct = Some(lock);
            }
        }

        let Some(lock) = ctx.tick.profit_lock_pct else {
            return;
        };
        let pnl = ctx.pnl_pct();
        if pnl < lock {
            let reason = format!("PROFIT_LOCK pnl {:.2}% < locked {:.2}%", pnl, lock);
            ctx.propose(self.name(), SellDecision::sell_all(Priority::Normal, reason));
        }
    }
}

/// Consecutive observer strikes override every hold
pub struct ThreeStrikesPolicy {
    limit: u32,
}

impl ThreeStrikesPolicy {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            limit: config.strike_limit,
        }
    }
}

impl SellPolicy for ThreeStrikesPolicy {
    fn name(&self) -> &'static str {
        "three_strikes"
    }

    fn apply(&self, ctx: &mut SellContext) {
        if self.limit > 0 && ctx.tick.plummet_strikes >= self.limit {
            let reason = format!("THREE_STRIKES {} consecutive drops", ctx.tick.plummet_strikes);
            ctx.propose(self.name(), SellDecision::sell_all(Priority::Urgent, reason));
        }
    }
}

/// Exit on the rug signal itself, upgrading any weaker exit already proposed
pub struct RugFallbackPolicy {
    severity: f64,
}

impl RugFallbackPolicy {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            severity: config.rug_severity,
        }
    }
}

impl SellPolicy for RugFallbackPolicy {
    fn name(&self) -> &'static str {
        "rug_fallback"
    }

    fn apply(&self, ctx: &mut SellContext) {
        if ctx.decision.is_protected() {
            return;
        }
        let reason = if ctx.valuation.unquotable {
            "RUG_UNQUOTABLE exit leg has no route".to_string()
        } else if ctx.risk.rugged {
            "RUG_DETECTED liquidity collapsed".to_string()
        } else if ctx.risk.urgent {
            "RUG_URGENT external flag".to_string()
        } else if ctx.risk.severity >= self.severity {
            format!(
                "RUG_SEVERITY {:.2} >= {:.2}",
                ctx.risk.severity, self.severity
            )
        } else {
            return;
        };
        ctx.propose(self.name(), SellDecision::sell_all(Priority::Urgent, reason));
    }
}

/// Briefly defers a soft exit while a strong reversal is underway
///
/// The deferral window is anchored at the first deferred tick and only
/// resets once the exit or the reversal goes away, so a failed execution
/// cannot restart it.
pub struct ReboundGate {
    max_defer: Duration,
    min_slope: f64,
}

impl ReboundGate {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            max_defer: Duration::milliseconds(config.rebound_max_defer_ms as i64),
            min_slope: config.rebound_min_slope,
        }
    }
}

impl SellPolicy for ReboundGate {
    fn name(&self) -> &'static str {
        "rebound_gate"
    }

    fn apply(&self, ctx: &mut SellContext) {
        let deferrable = ctx.decision.is_exit() && !ctx.decision.is_protected();
        if !deferrable || ctx.price_slope < self.min_slope {
            ctx.tick.rebound_defer_since = None;
            return;
        }

        let since = *ctx.tick.rebound_defer_since.get_or_insert(ctx.now);
        if ctx.now - since < self.max_defer {
            let reason = format!("rebound slope {:.2}/min", ctx.price_slope);
            ctx.veto(self.name(), &reason);
        } else {
            debug!(mint = %ctx.position.mint, "Rebound defer exhausted");
        }
    }
}

/// Loss-taking soft exits wait until the slip repeats across ticks
pub struct MomentumLossGuard {
    confirm_ticks: u32,
}

impl MomentumLossGuard {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            confirm_ticks: config.slip_confirm_ticks,
        }
    }
}

impl SellPolicy for MomentumLossGuard {
    fn name(&self) -> &'static str {
        "momentum_guard"
    }

    fn apply(&self, ctx: &mut SellContext) {
        if ctx.pnl_pct() >= 0.0 || ctx.tick.slip_streak >= self.confirm_ticks {
            return;
        }
        let reason = format!(
            "slip unconfirmed {}/{} ticks",
            ctx.tick.slip_streak, self.confirm_ticks
        );
        ctx.veto(self.name(), &reason);
    }
}

/// Soft exits never realize PnL below the floor
pub struct ProfitFloorGate {
    floor_pct: f64,
}

impl ProfitFloorGate {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            floor_pct: config.profit_floor_pct,
        }
    }
}

impl SellPolicy for ProfitFloorGate {
    fn name(&self) -> &'static str {
        "profit_floor"
    }

    fn apply(&self, ctx: &mut SellContext) {
        let pnl = ctx.pnl_pct();
        if pnl < self.floor_pct {
            let reason = format!("pnl {:.2}% below floor {:.2}%", pnl, self.floor_pct);
            ctx.veto(self.name(), &reason);
        }
    }
}
