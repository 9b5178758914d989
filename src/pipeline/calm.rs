//! Calm-mode policies: hold to the decaying target, exit a fading winner

use super::context::{Priority, SellContext, SellDecision};
use super::SellPolicy;
use crate::config::SellConfig;

/// Sell everything once live PnL reaches the decaying target
pub struct ProfitTargetPolicy;

impl SellPolicy for ProfitTargetPolicy {
    fn name(&self) -> &'static str {
        "profit_target"
    }

    fn apply(&self, ctx: &mut SellContext) {
        let pnl = ctx.pnl_pct();
        if pnl >= ctx.target_pct {
            let reason = format!("PNL_TARGET pnl {:.2}% >= target {:.2}%", pnl, ctx.target_pct);
            ctx.propose(self.name(), SellDecision::sell_all(Priority::Normal, reason));
        }
    }
}

/// Exit a winner that has given back a large share of its peak
pub struct FadeExitPolicy {
    min_peak_pct: f64,
    giveback_ratio: f64,
    floor_pct: f64,
}

impl FadeExitPolicy {
    pub fn new(config: &SellConfig) -> Self {
        Self {
            min_peak_pct: config.fade_min_peak_pct,
            giveback_ratio: config.fade_giveback_ratio,
            floor_pct: config.profit_floor_pct,
        }
    }
}

impl SellPolicy for FadeExitPolicy {
    fn name(&self) -> &'static str {
        "fade_exit"
    }

    fn apply(&self, ctx: &mut SellContext) {
        let pnl = ctx.pnl_pct();
        // Only protects gains; never turns a fade into a realized loss
        if pnl <= self.floor_pct {
            return;
        }
        if ctx.tick.fade.is_fading(self.min_peak_pct, self.giveback_ratio) {
            let reason = format!(
                "FADE_EXIT peak {:.2}% now {:.2}%",
                ctx.tick.fade.peak_pnl_pct, pnl
            );
            ctx.propose(self.name(), SellDecision::sell_all(Priority::Soft, reason));
        }
    }
}
