//! Signal History Store
//!
//! Bounded per-asset ring buffers of panel samples, queried for slopes and
//! freshness. Samples are never mutated once recorded. At most one sample is
//! kept per sampling interval, however often the panel is read.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::strategy::{SignalField, SignalSample};

/// Per-asset capacity-bounded sample buffers
#[derive(Debug)]
pub struct SignalHistory {
    capacity: usize,
    min_interval: Duration,
    buffers: DashMap<String, VecDeque<SignalSample>>,
}

impl SignalHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            min_interval: Duration::zero(),
            buffers: DashMap::new(),
        }
    }

    /// Minimum spacing between stored samples of one asset
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval.max(Duration::zero());
        self
    }

    /// Append a sample, evicting the oldest on overflow
    ///
    /// Samples older than the newest already stored, or closer to it than
    /// the sampling interval, are ignored. Returns whether it was stored.
    pub fn record(&self, mint: &str, sample: SignalSample) -> bool {
        let mut buf = self.buffers.entry(mint.to_string()).or_default();
        if let Some(last) = buf.back() {
            if sample.at < last.at {
                return false;
            }
            if self.min_interval > Duration::zero() && sample.at - last.at < self.min_interval {
                return false;
            }
        }
        buf.push_back(sample);
        while buf.len() > self.capacity {
            buf.pop_front();
        }
        true
    }

    pub fn len(&self, mint: &str) -> usize {
        self.buffers.get(mint).map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, mint: &str) -> bool {
        self.len(mint) == 0
    }

    /// Wall-clock span between the oldest and newest sample
    pub fn span(&self, mint: &str) -> Duration {
        self.buffers
            .get(mint)
            .and_then(|b| Some(b.back()?.at - b.front()?.at))
            .unwrap_or_else(Duration::zero)
    }

    pub fn latest(&self, mint: &str) -> Option<SignalSample> {
        self.buffers.get(mint).and_then(|b| b.back().cloned())
    }

    /// The newest `n` samples, oldest first
    pub fn recent(&self, mint: &str, n: usize) -> Vec<SignalSample> {
        self.buffers
            .get(mint)
            .map(|b| b.iter().skip(b.len().saturating_sub(n)).cloned().collect())
            .unwrap_or_default()
    }

    /// Rate of change per minute of `field` over the newest `window` samples
    ///
    /// Zero when fewer than two samples exist or they share a timestamp.
    pub fn slope(&self, mint: &str, field: SignalField, window: usize) -> f64 {
        let samples = self.recent(mint, window.max(2));
        slope_per_minute(&samples, field)
    }

    /// Whether the newest sample is younger than `max_age`
    pub fn is_fresh(&self, mint: &str, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.latest(mint)
            .map(|s| now - s.at <= max_age)
            .unwrap_or(false)
    }

    pub fn forget(&self, mint: &str) {
        self.buffers.remove(mint);
    }

    /// Drop every asset whose newest sample is older than `horizon`
    pub fn prune(&self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let before = self.buffers.len();
        self.buffers
            .retain(|_, buf| buf.back().map(|s| now - s.at <= horizon).unwrap_or(false));
        before - self.buffers.len()
    }

    /// Number of assets with a buffer
    pub fn tracked(&self) -> usize {
        self.buffers.len()
    }
}

/// Slope between the first and last sample, per minute
pub fn slope_per_minute(samples: &[SignalSample], field: SignalField) -> f64 {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return 0.0;
    };
    if samples.len() < 2 {
        return 0.0;
    }
    let minutes = (last.at - first.at).num_milliseconds() as f64 / 60_000.0;
    if minutes <= 0.0 {
        return 0.0;
    }
    (field.read(last) - field.read(first)) / minutes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(at: DateTime<Utc>, score: f64, change_5m: f64) -> SignalSample {
        SignalSample {
            at,
            score,
            liquidity_usd: 10_000.0,
            volume_1h: 5_000.0,
            change_5m,
            change_1h: 0.0,
        }
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let history = SignalHistory::new(3);
        let t0 = Utc::now();
        for i in 0..5 {
            history.record("M", sample(t0 + Duration::seconds(i), i as f64, 0.0));
        }
        assert_eq!(history.len("M"), 3);
        assert_eq!(history.recent("M", 10)[0].score, 2.0);
        assert_eq!(history.span("M"), Duration::seconds(2));
    }

    #[test]
    fn test_slope_per_minute() {
        let history = SignalHistory::new(10);
        let t0 = Utc::now();
        history.record("M", sample(t0, 10.0, 1.0));
        history.record("M", sample(t0 + Duration::seconds(30), 12.0, 2.0));
        history.record("M", sample(t0 + Duration::seconds(60), 16.0, 4.0));

        assert!((history.slope("M", SignalField::Score, 3) - 6.0).abs() < 1e-9);
        assert!((history.slope("M", SignalField::Change5m, 3) - 3.0).abs() < 1e-9);
        // Only the last two samples: +4 score over 30s
        assert!((history.slope("M", SignalField::Score, 2) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_slope_degenerate_cases() {
        let history = SignalHistory::new(10);
        assert_eq!(history.slope("none", SignalField::Score, 3), 0.0);
        let t0 = Utc::now();
        history.record("M", sample(t0, 1.0, 0.0));
        assert_eq!(history.slope("M", SignalField::Score, 3), 0.0);
    }

    #[test]
    fn test_out_of_order_sample_ignored() {
        let history = SignalHistory::new(10);
        let t0 = Utc::now();
        history.record("M", sample(t0, 1.0, 0.0));
        history.record("M", sample(t0 - Duration::seconds(5), 2.0, 0.0));
        assert_eq!(history.len("M"), 1);
    }

    #[test]
    fn test_samples_inside_interval_dropped() {
        let history = SignalHistory::new(3).with_min_interval(Duration::milliseconds(1500));
        let t0 = Utc::now();
        // Prefetch every 500ms plus the tick refresh: only one per 1.5s sticks
        let mut stored = 0;
        for i in 0..91 {
            if history.record("M", sample(t0 + Duration::milliseconds(i * 500), 0.0, 0.0)) {
                stored += 1;
            }
        }
        assert_eq!(stored, 31);
        assert_eq!(history.len("M"), 3);
        assert_eq!(history.span("M"), Duration::seconds(3));
        assert!(!history.record("M", sample(t0 + Duration::milliseconds(45_500), 0.0, 0.0)));
    }

    #[test]
    fn test_default_capacity_reaches_trigger_span() {
        let history = SignalHistory::new(120).with_min_interval(Duration::milliseconds(1500));
        let t0 = Utc::now();
        // 500ms prefetch interleaved with 1500ms tick refreshes
        let mut times: Vec<i64> = (0..=92)
            .map(|i| i * 500)
            .chain((0..=30).map(|i| i * 1500 + 1))
            .collect();
        times.sort_unstable();
        for ms in times {
            history.record("M", sample(t0 + Duration::milliseconds(ms), 0.0, 0.0));
        }
        assert_eq!(history.len("M"), 31);
        assert!(history.span("M") >= Duration::seconds(45));
    }

    #[test]
    fn test_prune_drops_idle_assets() {
        let history = SignalHistory::new(10);
        let t0 = Utc::now();
        history.record("old", sample(t0 - Duration::seconds(600), 1.0, 0.0));
        history.record("new", sample(t0 - Duration::seconds(5), 1.0, 0.0));

        assert_eq!(history.prune(t0, Duration::seconds(120)), 1);
        assert_eq!(history.tracked(), 1);
        assert!(history.is_empty("old"));
        assert_eq!(history.len("new"), 1);
    }

    #[test]
    fn test_freshness() {
        let history = SignalHistory::new(10);
        let t0 = Utc::now();
        history.record("M", sample(t0, 1.0, 0.0));
        assert!(history.is_fresh("M", t0 + Duration::seconds(1), Duration::seconds(2)));
        assert!(!history.is_fresh("M", t0 + Duration::seconds(3), Duration::seconds(2)));
        assert!(!history.is_fresh("other", t0, Duration::seconds(2)));
    }
}
