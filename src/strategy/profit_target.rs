//! Decaying profit target and fade-exit math

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::ProfitTargetConfig;

/// Recent PnL samples kept for fade detection
pub const FADE_RING: usize = 6;

/// Decay acceleration for an underperforming position
///
/// 1 while PnL is above the underperformance threshold; otherwise grows with
/// the shortfall and with time held, capped at `max_multiplier`.
pub fn decay_multiplier(cfg: &ProfitTargetConfig, elapsed_min: f64, pnl_pct: f64) -> f64 {
    if pnl_pct > cfg.underperformance_pct {
        return 1.0;
    }
    let shortfall = cfg.underperformance_pct - pnl_pct;
    (1.0 + cfg.k_pnl * shortfall + cfg.k_time * elapsed_min.max(0.0)).min(cfg.max_multiplier)
}

/// `max(floor, start - rate * multiplier * elapsed)`, in PnL percent
pub fn profit_target(cfg: &ProfitTargetConfig, elapsed_min: f64, pnl_pct: f64) -> f64 {
    let elapsed = elapsed_min.max(0.0);
    let rate = cfg.decay_pct / cfg.decay_period_mins;
    let mult = decay_multiplier(cfg, elapsed, pnl_pct);
    (cfg.start_pct - rate * mult * elapsed).max(cfg.floor_pct)
}

/// Peak PnL and a small ring of recent PnL samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FadeTracker {
    pub peak_pnl_pct: f64,
    pub recent: VecDeque<f64>,
}

impl FadeTracker {
    pub fn push(&mut self, pnl_pct: f64) {
        if self.recent.is_empty() || pnl_pct > self.peak_pnl_pct {
            self.peak_pnl_pct = pnl_pct;
        }
        self.recent.push_back(pnl_pct);
        while self.recent.len() > FADE_RING {
            self.recent.pop_front();
        }
    }

    /// Largest drop from any recent sample to the latest
    pub fn recent_drop(&self) -> f64 {
        let Some(latest) = self.recent.back() else {
            return 0.0;
        };
        let high = self.recent.iter().copied().fold(f64::MIN, f64::max);
        (high - latest).max(0.0)
    }

    /// Spread between the highest and lowest recent sample
    pub fn recent_swing(&self) -> f64 {
        if self.recent.len() < 2 {
            return 0.0;
        }
        let high = self.recent.iter().copied().fold(f64::MIN, f64::max);
        let low = self.recent.iter().copied().fold(f64::MAX, f64::min);
        high - low
    }

    /// True when each of the last `n` samples is below the one before
    pub fn falling_for(&self, n: usize) -> bool {
        if n == 0 || self.recent.len() < n + 1 {
            return false;
        }
        let tail: Vec<f64> = self.recent.iter().skip(self.recent.len() - n - 1).copied().collect();
        tail.windows(2).all(|w| w[1] < w[0])
    }

    /// A winner that has given back `giveback_ratio` of its peak and is still sliding
    pub fn is_fading(&self, min_peak_pct: f64, giveback_ratio: f64) -> bool {
        let Some(latest) = self.recent.back().copied() else {
            return false;
        };
        if self.peak_pnl_pct < min_peak_pct {
            return false;
        }
        let kept = self.peak_pnl_pct * (1.0 - giveback_ratio);
        latest <= kept && self.falling_for(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ProfitTargetConfig {
        ProfitTargetConfig {
            start_pct: 7.0,
            floor_pct: 2.0,
            decay_pct: 1.0,
            decay_period_mins: 3.0,
            underperformance_pct: 0.0,
            k_pnl: 0.1,
            k_time: 0.05,
            max_multiplier: 3.0,
        }
    }

    #[test]
    fn test_nine_minutes_no_penalty() {
        let target = profit_target(&cfg(), 9.0, 5.0);
        assert!((target - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_target_monotonic_and_floored() {
        let cfg = cfg();
        for pnl in [-20.0, -2.0, 0.0, 1.0, 5.0, 30.0] {
            let mut previous = f64::MAX;
            for step in 0..400 {
                let t = step as f64 * 0.25;
                let target = profit_target(&cfg, t, pnl);
                assert!(target <= previous + 1e-12, "pnl {} t {}", pnl, t);
                assert!(target >= cfg.floor_pct);
                previous = target;
            }
        }
    }

    #[test]
    fn test_underperformance_lowers_bar_faster() {
        let cfg = cfg();
        let healthy = profit_target(&cfg, 6.0, 1.0);
        let stalling = profit_target(&cfg, 6.0, -5.0);
        assert!(stalling < healthy);
        assert!(decay_multiplier(&cfg, 1000.0, -100.0) <= cfg.max_multiplier);
    }

    #[test]
    fn test_fade_detection() {
        let mut fade = FadeTracker::default();
        for pnl in [1.0, 4.0, 8.0, 6.0] {
            fade.push(pnl);
        }
        assert_eq!(fade.peak_pnl_pct, 8.0);
        assert!(!fade.is_fading(4.0, 0.5));
        fade.push(3.5);
        assert!(fade.is_fading(4.0, 0.5));
        // Peak too small to count as a winner
        assert!(!fade.is_fading(10.0, 0.5));
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut fade = FadeTracker::default();
        for i in 0..20 {
            fade.push(i as f64);
        }
        assert_eq!(fade.recent.len(), FADE_RING);
        assert!(!fade.falling_for(2));
        fade.push(10.0);
        fade.push(9.0);
        assert!(fade.falling_for(2));
        assert_eq!(fade.recent_drop(), 10.0);
    }
}
