//! Sell Policy Pipeline
//!
//! Every decision tick while holding:
//! 1. value the position (`valuation`)
//! 2. annotate the decaying profit target and update tick bookkeeping
//! 3. pick calm or rug mode from the force conditions
//! 4. run that mode's ordered policy chain over a shared [`SellContext`]
//! 5. hand any exit to the execution step (`execute`)
//!
//! Policies may propose, upgrade or veto; priorities on the decision keep a
//! hard or urgent exit from being downgraded by a later soft policy.

pub mod calm;
pub mod context;
pub mod execute;
pub mod rug;
pub mod valuation;

use tracing::{debug, info};

pub use context::{Milestone, Priority, SellAction, SellContext, SellDecision, Valuation};
pub use execute::{ExecutionReport, SellExecutor};
pub use valuation::Valuator;

use crate::config::{ProfitTargetConfig, SellConfig};
use crate::strategy::profit_target;

/// One link in the chain
pub trait SellPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, ctx: &mut SellContext);
}

pub struct SellPipeline {
    config: SellConfig,
    target: ProfitTargetConfig,
    calm: Vec<Box<dyn SellPolicy>>,
    rug: Vec<Box<dyn SellPolicy>>,
}

/// Calm chain: target hold/take plus the fade exit
pub fn calm_chain(config: &SellConfig) -> Vec<Box<dyn SellPolicy>> {
    vec![
        Box::new(calm::ProfitTargetPolicy),
        Box::new(calm::FadeExitPolicy::new(config)),
    ]
}

/// Rug chain: the calm chain followed by the rug policies, in order
pub fn rug_chain(config: &SellConfig) -> Vec<Box<dyn SellPolicy>> {
    let mut chain = calm_chain(config);
    chain.push(Box::new(rug::EarlyFadePolicy::new(config)));
    chain.push(Box::new(rug::ObserverDropPolicy::new(config)));
    chain.push(Box::new(rug::VolatilityGuardPolicy::new(config)));
    chain.push(Box::new(rug::FastExitLadder::new(config)));
    chain.push(Box::new(rug::DynamicHardStop::new(config)));
    chain.push(Box::new(rug::WarmingHoldPolicy::new(config)));
    chain.push(Box::new(rug::ProfitLockPolicy::new(config)));
    chain.push(Box::new(rug::ThreeStrikesPolicy::new(config)));
    chain.push(Box::new(rug::RugFallbackPolicy::new(config)));
    chain.push(Box::new(rug::ReboundGate::new(config)));
    chain.push(Box::new(rug::MomentumLossGuard::new(config)));
    chain.push(Box::new(rug::ProfitFloorGate::new(config)));
    chain
}

impl SellPipeline {
    pub fn new(config: SellConfig, target: ProfitTargetConfig) -> Self {
        let calm = calm_chain(&config);
        let rug = rug_chain(&config);
        Self::with_chains(config, target, calm, rug)
    }

    pub fn with_chains(
        config: SellConfig,
        target: ProfitTargetConfig,
        calm: Vec<Box<dyn SellPolicy>>,
        rug: Vec<Box<dyn SellPolicy>>,
    ) -> Self {
        Self {
            config,
            target,
            calm,
            rug,
        }
    }

    /// Target annotation and per-tick bookkeeping
    fn prepare(&self, ctx: &mut SellContext) {
        let pnl = ctx.pnl_pct();
        let net = ctx.valuation.net_sol();
        ctx.target_pct = profit_target(&self.target, ctx.elapsed_min, pnl);

        ctx.tick.fade.push(pnl);
        if net > ctx.tick.hwm_value_sol {
            ctx.tick.hwm_value_sol = net;
            ctx.tick.hwm_unit_price = ctx.valuation.unit_price;
        }

        match ctx.value_change_pct {
            Some(change) if change < 0.0 => {
                ctx.tick.slip_streak += 1;
                if -change >= self.config.observer_drop_pct {
                    ctx.tick.plummet_strikes += 1;
                } else {
                    ctx.tick.plummet_strikes = 0;
                }
            }
            Some(_) => {
                ctx.tick.slip_streak = 0;
                ctx.tick.plummet_strikes = 0;
            }
            None => {}
        }
        ctx.tick.last_value_sol = Some(net);
    }

    /// Force conditions that switch the tick into rug mode
    fn force_reasons(&self, ctx: &SellContext) -> Vec<String> {
        let mut reasons = Vec::new();
        if ctx.risk.severity >= self.config.rug_severity {
            reasons.push(format!("severity {:.2}", ctx.risk.severity));
        }
        if ctx.risk.urgent {
            reasons.push("urgent flag".to_string());
        }
        if ctx.risk.rugged {
            reasons.push("rugged".to_string());
        }
        if ctx.valuation.unquotable {
            reasons.push("unquotable".to_string());
        }
        if let Some(change) = ctx.value_change_pct {
            if change <= -self.config.quote_shock_pct {
                reasons.push(format!("quote shock {:.2}%", change));
            }
        }
        reasons
    }

    /// Run one tick and return the final decision
    pub fn run(&self, ctx: &mut SellContext) -> SellDecision {
        self.prepare(ctx);

        ctx.force_reasons = self.force_reasons(ctx);
        ctx.rug_mode = !ctx.force_reasons.is_empty();
        let chain = if ctx.rug_mode { &self.rug } else { &self.calm };

        for policy in chain {
            if ctx.is_halted() {
                debug!(mint = %ctx.position.mint, policy = policy.name(), "Chain halted");
                break;
            }
            policy.apply(ctx);
        }

        if ctx.decision.is_exit() {
            info!(
                mint = %ctx.position.mint,
                decision = %ctx.decision,
                pnl_pct = ctx.pnl_pct(),
                target_pct = ctx.target_pct,
                rug_mode = ctx.rug_mode,
                force = ?ctx.force_reasons,
                "Sell decision"
            );
        } else {
            debug!(
                mint = %ctx.position.mint,
                pnl_pct = ctx.pnl_pct(),
                target_pct = ctx.target_pct,
                rug_mode = ctx.rug_mode,
                "Holding"
            );
        }
        ctx.decision.clone()
    }
}
