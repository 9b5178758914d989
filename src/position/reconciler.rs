//! Pending-credit reconciler
//!
//! A submitted buy is only a promise until the asset shows up in the wallet.
//! Each buy enqueues a [`PendingCredit`]; a background watchdog polls the
//! ledger for it and either confirms the position or purges it once the
//! grace TTL runs out.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::{Position, PositionManager};
use crate::config::ReconcilerConfig;
use crate::error::{Error, Result};
use crate::services::{with_timeout, Ledger, TokenBalance};

/// One outstanding buy awaiting settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCredit {
    pub mint: String,
    pub tx_ref: String,
    pub expected_cost_sol: f64,
    pub expected_size_ui: f64,
    pub decimals_hint: u8,
    /// Position as it stood before this buy, if any
    pub base: Option<Position>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

impl PendingCredit {
    pub fn new(
        mint: &str,
        tx_ref: &str,
        expected_cost_sol: f64,
        expected_size_ui: f64,
        decimals_hint: u8,
        base: Option<Position>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            mint: mint.to_string(),
            tx_ref: tx_ref.to_string(),
            expected_cost_sol,
            expected_size_ui,
            decimals_hint,
            base,
            created_at: now,
            expires_at: now + ttl,
            last_attempt_at: None,
            attempts: 0,
        }
    }

    /// Quantity held before the buy
    pub fn base_size_ui(&self) -> f64 {
        self.base
            .as_ref()
            .filter(|p| !p.awaiting_size_sync)
            .map(|p| p.size_ui)
            .unwrap_or(0.0)
    }
}

/// What one poll did for one entry
#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
    Confirmed { mint: String, size_ui: f64 },
    /// Small early credit; judgment deferred until the warm-up passes
    Deferred { mint: String, credited_ui: f64 },
    Waiting { mint: String },
    Throttled { mint: String },
    Purged { mint: String, reason: String },
}

pub struct CreditReconciler {
    config: ReconcilerConfig,
    ttl: Duration,
    owner: String,
    ledger: Arc<dyn Ledger>,
    positions: Arc<PositionManager>,
    queue: DashMap<String, PendingCredit>,
    call_timeout_ms: u64,
    watchdog_ms: u64,
    running: AtomicBool,
    /// Epoch millis until which polling is suspended after upstream stress
    stress_until_ms: AtomicI64,
}

impl CreditReconciler {
    pub fn new(
        config: ReconcilerConfig,
        owner: &str,
        ledger: Arc<dyn Ledger>,
        positions: Arc<PositionManager>,
        call_timeout_ms: u64,
        watchdog_ms: u64,
    ) -> Self {
        Self {
            ttl: Duration::seconds(config.credit_ttl_secs as i64),
            config,
            owner: owner.to_string(),
            ledger,
            positions,
            queue: DashMap::new(),
            call_timeout_ms,
            watchdog_ms,
            running: AtomicBool::new(false),
            stress_until_ms: AtomicI64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn enqueue(&self, pending: PendingCredit) {
        info!(
            mint = %pending.mint,
            tx = %pending.tx_ref,
            expected_size = pending.expected_size_ui,
            expires_at = %pending.expires_at,
            "Pending credit enqueued"
        );
        self.queue.insert(pending.mint.clone(), pending);
    }

    pub fn pending(&self, mint: &str) -> Option<PendingCredit> {
        self.queue.get(mint).map(|p| p.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.queue.clear();
    }

    fn stressed(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() < self.stress_until_ms.load(Ordering::SeqCst)
    }

    fn note_stress(&self, now: DateTime<Utc>) {
        let backoff = self.config.min_poll_interval_ms as i64 * self.config.stress_backoff_factor as i64;
        self.stress_until_ms
            .store(now.timestamp_millis() + backoff, Ordering::SeqCst);
        debug!(backoff_ms = backoff, "Ledger stressed, backing off");
    }

    /// Classify a ledger error: stress suspends polling, anything else is a miss
    fn absorb<T>(&self, result: Result<T>, now: DateTime<Utc>, op: &str, mint: &str) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                if e.is_stress() {
                    self.note_stress(now);
                } else {
                    debug!(mint = %mint, op, "Credit lookup failed: {}", e);
                }
                None
            }
        }
    }

    /// Current total holding of `entry.mint`, zero when nothing is visible yet
    async fn observe(&self, entry: &PendingCredit, now: DateTime<Utc>) -> Result<f64> {
        let base = entry.base_size_ui();

        // 1. Direct balance poll
        let balance = with_timeout(
            "balance",
            self.call_timeout_ms,
            self.ledger.balance(&self.owner, &entry.mint),
        )
        .await;
        let stressed = matches!(&balance, Err(e) if e.is_stress());
        if let Some(TokenBalance { quantity, .. }) = self.absorb(balance, now, "balance", &entry.mint) {
            if quantity > base {
                return Ok(quantity);
            }
        }
        if stressed {
            return Ok(0.0);
        }

        // 2. Settled transaction post-balances
        let details = with_timeout(
            "tx_details",
            self.call_timeout_ms,
            self.ledger.tx_details(&entry.tx_ref),
        )
        .await;
        if let Some(Some(details)) = self.absorb(details, now, "tx_details", &entry.mint) {
            if !details.succeeded {
                return Err(Error::Transaction(format!("buy {} failed on chain", entry.tx_ref)));
            }
            if let Some(post) = details.post_balance(&self.owner, &entry.mint) {
                if post.quantity > base {
                    return Ok(post.quantity);
                }
            }
        }

        // 3. Owner-wide account scan
        let scan = with_timeout(
            "owner_scan",
            self.call_timeout_ms,
            self.ledger.owner_scan(&self.owner, &entry.mint),
        )
        .await;
        if let Some(TokenBalance { quantity, .. }) = self.absorb(scan, now, "owner_scan", &entry.mint) {
            if quantity > base {
                return Ok(quantity);
            }
        }
        Ok(0.0)
    }

    async fn purge(&self, mint: &str, reason: &str) -> CreditOutcome {
        self.queue.remove(mint);
        if let Err(e) = self.positions.purge(mint).await {
            warn!(mint = %mint, "Failed to persist purge: {}", e);
        }
        CreditOutcome::Purged {
            mint: mint.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn poll_entry(&self, mut entry: PendingCredit, now: DateTime<Utc>) -> CreditOutcome {
        let mint = entry.mint.clone();

        if now >= entry.expires_at {
            warn!(
                mint = %mint,
                tx = %entry.tx_ref,
                attempts = entry.attempts,
                expected_size = entry.expected_size_ui,
                "Credit never observed before expiry, dropping expectation"
            );
            return self.purge(&mint, "expired").await;
        }

        let min_gap = Duration::milliseconds(self.config.min_poll_interval_ms as i64);
        if self.stressed(now)
            || entry.last_attempt_at.is_some_and(|last| now - last < min_gap)
        {
            return CreditOutcome::Throttled { mint };
        }

        entry.last_attempt_at = Some(now);
        entry.attempts += 1;
        self.queue.insert(mint.clone(), entry.clone());

        let total = match self.observe(&entry, now).await {
            Ok(total) => total,
            Err(e) => {
                warn!(mint = %mint, "Buy did not settle: {}", e);
                return self.purge(&mint, "failed").await;
            }
        };

        let credited = total - entry.base_size_ui();
        if credited <= 0.0 {
            debug!(mint = %mint, attempt = entry.attempts, "Credit not visible yet");
            return CreditOutcome::Waiting { mint };
        }

        let in_warmup = now - entry.created_at < Duration::seconds(self.config.warmup_secs as i64);
        let floor = entry.expected_size_ui * self.config.partial_fill_ratio;
        if in_warmup && credited < floor {
            debug!(
                mint = %mint,
                credited,
                floor,
                "Small credit during warm-up, deferring"
            );
            return CreditOutcome::Deferred {
                mint,
                credited_ui: credited,
            };
        }

        let decimals = match with_timeout(
            "mint_decimals",
            self.call_timeout_ms,
            self.ledger.mint_decimals(&mint),
        )
        .await
        {
            Ok(d) => d,
            Err(_) => entry.decimals_hint,
        };

        match self.positions.confirm_credit(&mint, total, decimals, now).await {
            Ok(_) => {
                self.queue.remove(&mint);
                info!(
                    mint = %mint,
                    size = total,
                    expected = entry.expected_size_ui,
                    attempts = entry.attempts,
                    "Credit reconciled"
                );
                CreditOutcome::Confirmed {
                    mint,
                    size_ui: total,
                }
            }
            Err(Error::NoPosition) => self.purge(&mint, "position gone").await,
            Err(e) => {
                warn!(mint = %mint, "Failed to confirm credit: {}", e);
                CreditOutcome::Waiting { mint }
            }
        }
    }

    /// Poll every outstanding entry once
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Vec<CreditOutcome> {
        let entries: Vec<PendingCredit> = self.queue.iter().map(|e| e.value().clone()).collect();
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(self.poll_entry(entry, now).await);
        }
        outcomes
    }

    /// Watchdog loop; exits on an empty queue, the age ceiling or cancellation
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let started = tokio::time::Instant::now();
        let ceiling = std::time::Duration::from_secs(self.config.watchdog_ceiling_secs);
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(self.watchdog_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        debug!("Credit watchdog started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            self.poll_once(Utc::now()).await;

            if self.queue.is_empty() {
                break;
            }
            if started.elapsed() >= ceiling {
                warn!(pending = self.queue.len(), "Credit watchdog hit its age ceiling");
                break;
            }
        }
        self.running.store(false, Ordering::SeqCst);
        debug!("Credit watchdog stopped");
    }

    /// Spawn the watchdog unless one is already running
    pub fn ensure_running(self: &Arc<Self>, cancel: CancellationToken) {
        if self.queue.is_empty() {
            return;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tokio::spawn(self.clone().run(cancel));
        }
    }
}
