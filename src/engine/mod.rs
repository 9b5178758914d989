//! Decision engine
//!
//! Owns the tick loop and ties selection, triggering, buying, valuation and
//! the sell pipeline together. Every tick is stamped with the generation it
//! started under; a stop bumps the generation so in-flight work notices at
//! its next suspension point and bails out.

mod buy;

pub use buy::buy_spend;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, ErrorClass, Result};
use crate::persist::{Settings, StateStore};
use crate::pipeline::{
    ExecutionReport, Milestone, Priority, SellAction, SellContext, SellDecision, SellExecutor,
    SellPipeline, Valuation, Valuator,
};
use crate::position::{CreditReconciler, PendingCredit, Phase, Position, PositionManager};
use crate::registry::LockRegistry;
use crate::services::{with_timeout, Services};
use crate::signals::SignalHistory;
use crate::strategy::{
    CandidateSelector, EdgeEstimator, EntryMode, LiquidityPreflight, RoundTripEdge, RugSignal,
    SelectionMode, SignalField, TriggerEvaluator, TriggerVerdict,
};

/// How long `stop` waits for an in-flight tick before liquidating anyway
const STOP_DRAIN_MS: u64 = 5_000;

/// Read-only view for the status command
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub running: bool,
    pub generation: u64,
    pub phase: Phase,
    pub observing: Option<String>,
    pub position: Option<Position>,
    pub pending_credits: usize,
    pub router_cooldown_ms: Option<u64>,
    pub settings: Settings,
}

/// Clears the busy flag when a tick finishes, however it finishes
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Engine {
    config: Config,
    settings: RwLock<Settings>,
    services: Services,
    store: Arc<StateStore>,
    positions: Arc<PositionManager>,
    reconciler: Arc<CreditReconciler>,
    registry: Arc<LockRegistry>,
    history: Arc<SignalHistory>,
    trigger: Arc<TriggerEvaluator>,
    selector: CandidateSelector,
    edge: EdgeEstimator,
    liquidity: LiquidityPreflight,
    valuator: Valuator,
    pipeline: SellPipeline,
    executor: SellExecutor,
    /// Last risk signal seen per held mint, reused while the classifier is down
    last_risk: DashMap<String, RugSignal>,
    generation: AtomicU64,
    running: AtomicBool,
    tick_busy: AtomicBool,
    cancel: CancellationToken,
}

impl Engine {
    /// Wire every component from `config`
    ///
    /// Persisted settings are expected to be applied to `config` already.
    pub fn new(config: Config, services: Services, store: Arc<StateStore>) -> Self {
        let call_ms = config.engine.call_timeout_ms;
        let slippage = config.trading.slippage_bps;

        let positions = Arc::new(PositionManager::new(store.clone()));
        let registry = Arc::new(LockRegistry::new(config.safety.clone()));
        let history = Arc::new(
            SignalHistory::new(config.trigger.history_capacity).with_min_interval(
                chrono::Duration::milliseconds(config.trigger.sample_interval_ms as i64),
            ),
        );
        let trigger = Arc::new(TriggerEvaluator::new(config.trigger.clone()));

        let reconciler = Arc::new(CreditReconciler::new(
            config.reconciler.clone(),
            &services.owner,
            services.ledger.clone(),
            positions.clone(),
            call_ms,
            config.engine.watchdog_ms,
        ));
        let selector = CandidateSelector::new(
            config.selection.clone(),
            services.panel.clone(),
            history.clone(),
            trigger.clone(),
            registry.clone(),
        );
        let edge = EdgeEstimator::new(
            config.edge.clone(),
            services.quotes.clone(),
            services.ledger.clone(),
            &services.owner,
            slippage,
            call_ms,
        );
        let liquidity =
            LiquidityPreflight::new(&config.safety, services.quotes.clone(), slippage, call_ms);
        let valuator = Valuator::new(config.edge.clone(), services.quotes.clone(), slippage, call_ms);
        let pipeline = SellPipeline::new(config.sell.clone(), config.profit_target.clone());
        let executor = SellExecutor::new(
            &config.trading,
            call_ms,
            services.clone(),
            registry.clone(),
            positions.clone(),
        );

        Self {
            settings: RwLock::new(Settings::from_config(&config)),
            config,
            services,
            store,
            positions,
            reconciler,
            registry,
            history,
            trigger,
            selector,
            edge,
            liquidity,
            valuator,
            pipeline,
            executor,
            last_risk: DashMap::new(),
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
            tick_busy: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn positions(&self) -> &Arc<PositionManager> {
        &self.positions
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &Arc<SignalHistory> {
        &self.history
    }

    pub fn reconciler(&self) -> &Arc<CreditReconciler> {
        &self.reconciler
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Change runtime settings and persist them
    ///
    /// `enabled`, `buy_fraction` and `poll_ms` take effect immediately; the
    /// rest apply on the next start.
    pub async fn update_settings<F>(&self, change: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let updated = {
            let mut settings = self.settings.write().await;
            change(&mut settings);
            settings.clone()
        };
        self.store.save_settings(updated.clone()).await?;
        info!(
            enabled = updated.enabled,
            mode = %updated.selection_mode,
            poll_ms = updated.poll_ms,
            buy_fraction = updated.buy_fraction,
            "Settings updated"
        );
        Ok(updated)
    }

    pub(crate) fn check_generation(&self, generation: u64) -> Result<()> {
        if self.generation() != generation {
            return Err(Error::StaleGeneration(generation));
        }
        Ok(())
    }

    /// Reload the persisted position and resume any unfinished credit
    pub async fn restore(&self) -> Option<Position> {
        let position = self.positions.restore().await?;
        if position.awaiting_size_sync {
            match &position.entry_tx {
                Some(tx) => {
                    self.reconciler.enqueue(PendingCredit::new(
                        &position.mint,
                        tx,
                        position.cost_basis_sol,
                        position.size_ui,
                        position.decimals,
                        None,
                        Utc::now(),
                        self.reconciler.ttl(),
                    ));
                }
                None => warn!(mint = %position.mint, "Provisional position without a buy reference"),
            }
        }
        Some(position)
    }

    /// Spawn the tick, prefetch and credit watchdog tasks
    pub fn start(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Engine already running");
            return;
        }
        info!(generation = self.generation(), "Engine started");

        tokio::spawn(self.clone().tick_loop(self.cancel.child_token()));
        tokio::spawn(self.clone().prefetch_loop(self.cancel.child_token()));
        self.reconciler.ensure_running(self.cancel.child_token());
    }

    async fn poll_ms(&self) -> u64 {
        self.settings.read().await.poll_ms.max(50)
    }

    async fn tick_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut period = self.poll_ms().await;
        let mut ticker = interval(Duration::from_millis(period));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let generation = self.generation();
            match self.tick(generation).await {
                Ok(()) => {}
                Err(Error::StaleGeneration(_)) => debug!("Tick abandoned after stop"),
                Err(e) if e.class() == ErrorClass::Fatal => error!("Tick failed: {}", e),
                Err(e) => debug!("Tick skipped: {}", e),
            }

            let current = self.poll_ms().await;
            if current != period {
                period = current;
                ticker = interval(Duration::from_millis(period));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }
        }
        debug!("Tick loop stopped");
    }

    async fn prefetch_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_millis(self.config.engine.prefetch_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.prune_idle(Utc::now());
            if !self.settings.read().await.enabled || self.positions.phase().await.is_active() {
                continue;
            }
            if let Err(e) = self.selector.prefetch(Utc::now()).await {
                debug!("Prefetch failed: {}", e);
            }
        }
        debug!("Prefetch loop stopped");
    }

    /// Stop tracking assets that have not been sampled within the horizon
    pub(crate) fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let horizon = chrono::Duration::seconds(self.config.trigger.history_horizon_secs as i64);
        let dropped = self.history.prune(now, horizon) + self.registry.prune(now, horizon);
        if dropped > 0 {
            debug!(dropped, tracked = self.history.tracked(), "Pruned idle assets");
        }
        dropped
    }

    /// One decision tick under `generation`
    pub async fn tick(&self, generation: u64) -> Result<()> {
        self.check_generation(generation)?;
        if self
            .tick_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Previous tick still running");
            return Ok(());
        }
        let _busy = BusyGuard(&self.tick_busy);

        match self.positions.phase().await {
            Phase::PendingCredit => {
                self.reconciler.ensure_running(self.cancel.child_token());
                Ok(())
            }
            Phase::Holding => self.manage(generation).await,
            Phase::Selling => Ok(()),
            Phase::Idle | Phase::Observing | Phase::Closed => {
                if self.settings.read().await.enabled {
                    self.seek(generation).await
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Pick a candidate, observe it and buy when the trigger fires
    async fn seek(&self, generation: u64) -> Result<()> {
        let now = Utc::now();
        let Some(pick) = self.selector.select(now).await? else {
            return Ok(());
        };
        if let Some(ban) = self.registry.is_banned(&pick.mint, now) {
            debug!(mint = %pick.mint, reason = %ban.reason, "Candidate banned");
            self.selector.clear().await;
            return Ok(());
        }

        self.positions.observe(&pick.mint).await?;
        let panel = self.selector.refresh(&pick.mint, now).await?;
        self.check_generation(generation)?;

        let mode = match self.trigger.evaluate(&pick.mint, &self.history, panel.badge) {
            TriggerVerdict::Fire(mode) => mode,
            TriggerVerdict::Wait(reason) => {
                debug!(mint = %pick.mint, reason = %reason, "Waiting");
                return Ok(());
            }
        };
        let mode = if pick.mode == SelectionMode::Leader {
            EntryMode::Leader
        } else {
            mode
        };

        info!(mint = %pick.mint, mode = %mode, score = pick.score, "Trigger fired");
        match self.buy(generation, &pick.mint, &panel, mode, now).await {
            Ok(tx) => {
                info!(mint = %pick.mint, tx = %tx, "Buy submitted, awaiting credit");
                self.selector.clear().await;
                Ok(())
            }
            Err(e) if e.blacklists_asset() => {
                warn!(mint = %pick.mint, "Buy refused: {}", e);
                self.registry.blacklist(&pick.mint, &e.to_string(), Utc::now());
                self.history.forget(&pick.mint);
                self.selector.clear().await;
                self.positions.stop_observing().await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Value the held position, run the sell pipeline and execute any exit
    async fn manage(&self, generation: u64) -> Result<()> {
        let Some(position) = self.positions.snapshot().await else {
            return Ok(());
        };
        let mint = position.mint.clone();

        let valuation = match self.valuator.value(&position).await {
            Ok(v) => v,
            Err(e) => {
                debug!(mint = %mint, "Valuation skipped: {}", e);
                return Ok(());
            }
        };
        self.check_generation(generation)?;

        let call_ms = self.config.engine.call_timeout_ms;
        let risk = match with_timeout("risk", call_ms, self.services.risk.risk_signal(&mint)).await
        {
            Ok(signal) => {
                self.last_risk.insert(mint.clone(), signal);
                signal
            }
            Err(e) => match self.last_risk.get(&mint).map(|r| *r) {
                Some(signal) => {
                    warn!(mint = %mint, "Risk signal unavailable, reusing last known: {}", e);
                    signal
                }
                None => {
                    warn!(mint = %mint, "Risk signal unavailable, tick skipped: {}", e);
                    return Ok(());
                }
            },
        };
        let now = Utc::now();
        let panel = self.selector.refresh(&mint, now).await.ok();
        let slope = self.history.slope(
            &mint,
            SignalField::Change5m,
            self.trigger.config().slope_window,
        );
        self.check_generation(generation)?;

        let mut ctx = SellContext::new(now, position, valuation, risk, panel, slope);
        let decision = self.pipeline.run(&mut ctx);
        self.positions.commit_tick(&mint, ctx.tick.clone(), now).await?;

        if !decision.is_exit() {
            return Ok(());
        }
        self.check_generation(generation)?;

        match self.executor.execute(&mint, &decision, ctx.valuation.net_sol()).await {
            Ok(report) => {
                self.after_sell(&report, &decision).await;
                Ok(())
            }
            Err(e) if e.is_retryable() || e.class() == ErrorClass::Structural => {
                warn!(mint = %mint, decision = %decision, "Sell deferred: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn after_sell(&self, report: &ExecutionReport, decision: &SellDecision) {
        if report.closed {
            self.registry.ban_reentry(&report.mint, Utc::now());
            self.history.forget(&report.mint);
            self.last_risk.remove(&report.mint);
            return;
        }
        let Some(milestone) = decision.milestone else {
            return;
        };
        let Some(position) = self.positions.snapshot().await else {
            return;
        };
        let mut tick = position.tick.clone();
        match milestone {
            Milestone::Tp1 => tick.tp1_done = true,
            Milestone::Tp2 => tick.tp2_done = true,
        }
        if let Err(e) = self.positions.commit_tick(&report.mint, tick, Utc::now()).await {
            warn!(mint = %report.mint, "Milestone not recorded: {}", e);
        }
    }

    /// Sell the whole position now, bypassing the pipeline
    ///
    /// A pending credit gets one reconciliation pass first; if it is still
    /// unconfirmed the position stays persisted for the next start.
    pub async fn liquidate(&self, reason: &str) -> Result<Option<ExecutionReport>> {
        if self.positions.phase().await == Phase::PendingCredit {
            self.reconciler.poll_once(Utc::now()).await;
            if self.positions.phase().await == Phase::PendingCredit {
                warn!("Credit still pending, leaving position for the next start");
                return Ok(None);
            }
        }
        let Some(position) = self.positions.snapshot().await else {
            return Ok(None);
        };

        let expected = match self.valuator.value(&position).await {
            Ok(v) => v.net_sol(),
            Err(e) => {
                debug!(mint = %position.mint, "Liquidation valuation failed: {}", e);
                0.0
            }
        };
        let decision = SellDecision::sell_all(Priority::Hard, reason);
        info!(mint = %position.mint, reason = %reason, "Liquidating position");

        let report = match self.executor.execute(&position.mint, &decision, expected).await {
            Err(Error::RouterCooldown(ms)) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.executor.execute(&position.mint, &decision, expected).await?
            }
            other => other?,
        };
        if report.closed {
            self.registry.ban_reentry(&report.mint, Utc::now());
            self.last_risk.remove(&report.mint);
        }
        Ok(Some(report))
    }

    /// Stop all loops and, if configured, liquidate the open position
    pub async fn stop(&self) -> Result<Option<ExecutionReport>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel.cancel();
        self.running.store(false, Ordering::SeqCst);
        info!(generation, "Engine stopping");

        let mut waited = 0;
        while self.tick_busy.load(Ordering::SeqCst) && waited < STOP_DRAIN_MS {
            tokio::time::sleep(Duration::from_millis(25)).await;
            waited += 25;
        }
        self.positions.stop_observing().await;
        self.selector.clear().await;

        if self.config.engine.liquidate_on_stop {
            return self.liquidate("STOP_LIQUIDATE").await;
        }
        Ok(None)
    }

    /// Manual sell of the current position
    pub async fn sell_now(&self, pct: Option<f64>) -> Result<ExecutionReport> {
        let position = self.positions.snapshot().await.ok_or(Error::NoPosition)?;
        let expected = self.valuator.value(&position).await?.net_sol();
        let decision = match pct {
            Some(p) if p < 100.0 => SellDecision::sell_partial(p, Priority::Hard, "MANUAL"),
            _ => SellDecision::sell_all(Priority::Hard, "MANUAL"),
        };
        if decision.action == SellAction::None {
            return Err(Error::Internal("nothing to sell".into()));
        }
        self.executor.execute(&position.mint, &decision, expected).await
    }

    /// Current valuation of the held position
    pub async fn valuation(&self) -> Result<Option<Valuation>> {
        match self.positions.snapshot().await {
            Some(position) => Ok(Some(self.valuator.value(&position).await?)),
            None => Ok(None),
        }
    }

    /// Round-trip edge for a hypothetical buy of `spend_sol`
    pub async fn edge(&self, mint: &str, spend_sol: f64) -> Result<RoundTripEdge> {
        self.edge.round_trip(mint, spend_sol).await
    }

    pub async fn status(&self) -> EngineStatus {
        let now: DateTime<Utc> = Utc::now();
        EngineStatus {
            enabled: self.settings.read().await.enabled,
            running: self.is_running(),
            generation: self.generation(),
            phase: self.positions.phase().await,
            observing: self.positions.observing().await,
            position: self.positions.snapshot().await,
            pending_credits: self.reconciler.len(),
            router_cooldown_ms: self
                .registry
                .router_cooldown(now)
                .map(|d| d.num_milliseconds().max(0) as u64),
            settings: self.settings().await,
        }
    }
}
