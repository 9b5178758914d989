//! Locking & Cooldown Registry
//!
//! Per-asset mutual exclusion with absolute expiry, a global short-lived buy
//! lock, a router cooldown after swap failures and timed bans.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::SafetyConfig;
use crate::error::{Error, Result};
use crate::strategy::Badge;

const BUY_LOCK_KEY: &str = "buy";

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    token: u64,
    expires_at: DateTime<Utc>,
}

/// Held lock, released on drop
///
/// Release only removes the entry this guard created, so a guard outliving
/// its expiry cannot free a lock someone else has since taken.
#[derive(Debug)]
pub struct LockGuard {
    locks: Arc<DashMap<String, LockEntry>>,
    key: String,
    token: u64,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let token = self.token;
        self.locks.remove_if(&self.key, |_, e| e.token == token);
    }
}

/// Why an asset may not be traded right now
#[derive(Debug, Clone, PartialEq)]
pub struct Ban {
    pub reason: String,
    pub until: DateTime<Utc>,
}

pub struct LockRegistry {
    config: SafetyConfig,
    locks: Arc<DashMap<String, LockEntry>>,
    next_token: AtomicU64,
    router_cooldown_until: Mutex<Option<DateTime<Utc>>>,
    bans: DashMap<String, Ban>,
    /// Last badge seen per asset and when
    last_badge: DashMap<String, (Badge, DateTime<Utc>)>,
}

impl LockRegistry {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            locks: Arc::new(DashMap::new()),
            next_token: AtomicU64::new(1),
            router_cooldown_until: Mutex::new(None),
            bans: DashMap::new(),
            last_badge: DashMap::new(),
        }
    }

    fn acquire(&self, key: String, ttl_ms: u64, now: DateTime<Utc>) -> Option<LockGuard> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let entry = LockEntry {
            token,
            expires_at: now + Duration::milliseconds(ttl_ms as i64),
        };

        let mut acquired = false;
        self.locks
            .entry(key.clone())
            .and_modify(|e| {
                // An expired holder no longer blocks
                if e.expires_at <= now {
                    *e = entry;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                entry
            });

        acquired.then(|| LockGuard {
            locks: self.locks.clone(),
            key,
            token,
        })
    }

    /// Exclusive per-asset lock for buy submission and sell execution
    pub fn lock_asset(&self, mint: &str, now: DateTime<Utc>) -> Result<LockGuard> {
        self.acquire(format!("asset:{}", mint), self.config.asset_lock_ms, now)
            .ok_or_else(|| Error::Locked(mint.to_string()))
    }

    /// Global buy lock
    pub fn lock_buy(&self, now: DateTime<Utc>) -> Result<LockGuard> {
        self.acquire(BUY_LOCK_KEY.to_string(), self.config.buy_lock_ms, now)
            .ok_or(Error::BuyLockHeld)
    }

    pub fn is_asset_locked(&self, mint: &str, now: DateTime<Utc>) -> bool {
        self.locks
            .get(&format!("asset:{}", mint))
            .map(|e| e.expires_at > now)
            .unwrap_or(false)
    }

    /// Start the router cooldown after a swap failure
    pub fn trip_router(&self, now: DateTime<Utc>) {
        let until = now + Duration::milliseconds(self.config.router_cooldown_ms as i64);
        if let Ok(mut guard) = self.router_cooldown_until.lock() {
            *guard = Some(until);
        }
        warn!(until = %until, "Router cooldown started");
    }

    /// Remaining router cooldown, if any
    pub fn router_cooldown(&self, now: DateTime<Utc>) -> Option<Duration> {
        let guard = self.router_cooldown_until.lock().ok()?;
        guard.filter(|until| *until > now).map(|until| until - now)
    }

    /// Fail with `RouterCooldown` while the cooldown runs
    pub fn check_router(&self, now: DateTime<Utc>) -> Result<()> {
        match self.router_cooldown(now) {
            Some(left) => Err(Error::RouterCooldown(left.num_milliseconds().max(0) as u64)),
            None => Ok(()),
        }
    }

    fn ban(&self, mint: &str, reason: &str, secs: u64, now: DateTime<Utc>) {
        let until = now + Duration::seconds(secs as i64);
        let mut entry = self.bans.entry(mint.to_string()).or_insert(Ban {
            reason: reason.to_string(),
            until,
        });
        // Never shorten an existing ban
        if entry.until < until {
            *entry = Ban {
                reason: reason.to_string(),
                until,
            };
        }
    }

    /// Blacklist an asset after a gate failure
    pub fn blacklist(&self, mint: &str, reason: &str, now: DateTime<Utc>) {
        info!(mint = %mint, reason = %reason, secs = self.config.blacklist_secs, "Asset blacklisted");
        self.ban(mint, reason, self.config.blacklist_secs, now);
    }

    /// Timed re-entry ban
    pub fn ban_reentry(&self, mint: &str, now: DateTime<Utc>) {
        info!(mint = %mint, secs = self.config.reentry_ban_secs, "Re-entry ban");
        self.ban(mint, "pumping to calm", self.config.reentry_ban_secs, now);
    }

    /// Active ban reason, purging expired bans
    pub fn is_banned(&self, mint: &str, now: DateTime<Utc>) -> Option<Ban> {
        let ban = self.bans.get(mint).map(|b| b.clone())?;
        if ban.until <= now {
            self.bans.remove_if(mint, |_, b| b.until <= now);
            return None;
        }
        Some(ban)
    }

    /// Fail with `Banned` while a ban is active
    pub fn check_ban(&self, mint: &str, now: DateTime<Utc>) -> Result<()> {
        match self.is_banned(mint, now) {
            Some(ban) => Err(Error::Banned {
                mint: mint.to_string(),
                reason: ban.reason,
            }),
            None => Ok(()),
        }
    }

    /// Track badge transitions; pumping to calm triggers a re-entry ban
    pub fn observe_badge(&self, mint: &str, badge: Badge, now: DateTime<Utc>) {
        let previous = self
            .last_badge
            .insert(mint.to_string(), (badge, now))
            .map(|(b, _)| b);
        if previous == Some(Badge::Pumping) && badge == Badge::Calm {
            debug!(mint = %mint, "Badge fell from pumping to calm");
            self.ban_reentry(mint, now);
        }
    }

    /// Forget badges not seen within `horizon` and bans that have lapsed
    pub fn prune(&self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let before = self.last_badge.len() + self.bans.len();
        self.last_badge.retain(|_, (_, seen)| now - *seen <= horizon);
        self.bans.retain(|_, ban| ban.until > now);
        before - (self.last_badge.len() + self.bans.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> LockRegistry {
        LockRegistry::new(SafetyConfig::default())
    }

    #[test]
    fn test_asset_lock_is_exclusive() {
        let registry = registry();
        let now = Utc::now();
        let guard = registry.lock_asset("M", now).unwrap();
        assert!(matches!(registry.lock_asset("M", now), Err(Error::Locked(_))));
        assert!(registry.lock_asset("N", now).is_ok());
        drop(guard);
        assert!(registry.lock_asset("M", now).is_ok());
    }

    #[test]
    fn test_expired_lock_can_be_taken_over() {
        let registry = registry();
        let now = Utc::now();
        let stale = registry.lock_asset("M", now).unwrap();
        let later = now + Duration::seconds(21);
        let fresh = registry.lock_asset("M", later).unwrap();

        // The stale holder releasing must not free the new holder's lock
        drop(stale);
        assert!(registry.is_asset_locked("M", later));
        drop(fresh);
        assert!(!registry.is_asset_locked("M", later));
    }

    #[test]
    fn test_buy_lock() {
        let registry = registry();
        let now = Utc::now();
        let _guard = registry.lock_buy(now).unwrap();
        assert!(matches!(registry.lock_buy(now), Err(Error::BuyLockHeld)));
        assert!(registry.lock_buy(now + Duration::seconds(11)).is_ok());
    }

    #[test]
    fn test_router_cooldown() {
        let registry = registry();
        let now = Utc::now();
        assert!(registry.check_router(now).is_ok());
        registry.trip_router(now);
        assert!(matches!(
            registry.check_router(now + Duration::seconds(5)),
            Err(Error::RouterCooldown(_))
        ));
        assert!(registry.check_router(now + Duration::seconds(16)).is_ok());
    }

    #[test]
    fn test_blacklist_expires() {
        let registry = registry();
        let now = Utc::now();
        registry.blacklist("M", "no route", now);
        assert!(registry.check_ban("M", now).is_err());
        assert!(registry.is_banned("M", now + Duration::seconds(601)).is_none());
    }

    #[test]
    fn test_pumping_to_calm_bans_reentry() {
        let registry = registry();
        let now = Utc::now();
        registry.observe_badge("M", Badge::Pumping, now);
        assert!(registry.is_banned("M", now).is_none());
        registry.observe_badge("M", Badge::Calm, now);
        let ban = registry.is_banned("M", now + Duration::seconds(900)).unwrap();
        assert_eq!(ban.reason, "pumping to calm");

        // Warming to calm is not a dump
        registry.observe_badge("N", Badge::Warming, now);
        registry.observe_badge("N", Badge::Calm, now);
        assert!(registry.is_banned("N", now).is_none());
    }

    #[test]
    fn test_prune_forgets_idle_badges_and_lapsed_bans() {
        let registry = registry();
        let now = Utc::now();
        registry.observe_badge("old", Badge::Pumping, now - Duration::seconds(600));
        registry.observe_badge("new", Badge::Pumping, now);
        registry.blacklist("X", "edge", now - Duration::seconds(3600));
        registry.blacklist("Y", "edge", now);

        assert_eq!(registry.prune(now, Duration::seconds(300)), 2);
        assert!(registry.is_banned("Y", now).is_some());
        // The idle asset's pumping state is gone, so calm is not a transition
        registry.observe_badge("old", Badge::Calm, now);
        assert!(registry.is_banned("old", now).is_none());
        registry.observe_badge("new", Badge::Calm, now);
        assert!(registry.is_banned("new", now).is_some());
    }

    #[test]
    fn test_ban_is_never_shortened() {
        let registry = registry();
        let now = Utc::now();
        registry.ban_reentry("M", now);
        registry.blacklist("M", "edge", now);
        let ban = registry.is_banned("M", now).unwrap();
        assert_eq!(ban.until, now + Duration::seconds(1200));
    }
}
