//! Trigger Evaluator
//!
//! Decides from cached history whether an asset has been observed long
//! enough, and is moving up fast enough, to justify a buy.

use tracing::debug;

use super::types::{Badge, EntryMode, SignalField};
use crate::config::TriggerConfig;
use crate::signals::SignalHistory;

/// Why the trigger held fire
#[derive(Debug, Clone, PartialEq)]
pub enum WaitReason {
    TooFewSamples { have: usize, need: usize },
    SpanTooShort { have_secs: i64, need_secs: u64 },
    PriceNotRising { change_5m: f64 },
    NoMomentum { price_slope: f64, score_slope: f64 },
    Badge(Badge),
}

impl std::fmt::Display for WaitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitReason::TooFewSamples { have, need } => write!(f, "samples {}/{}", have, need),
            WaitReason::SpanTooShort {
                have_secs,
                need_secs,
            } => write!(f, "span {}s/{}s", have_secs, need_secs),
            WaitReason::PriceNotRising { change_5m } => write!(f, "change_5m {:.2}%", change_5m),
            WaitReason::NoMomentum {
                price_slope,
                score_slope,
            } => write!(
                f,
                "price slope {:.2}/min, score slope {:.2}/min",
                price_slope, score_slope
            ),
            WaitReason::Badge(badge) => write!(f, "badge {}", badge),
        }
    }
}

/// Outcome of one trigger evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerVerdict {
    Fire(EntryMode),
    Wait(WaitReason),
}

impl TriggerVerdict {
    pub fn fires(&self) -> bool {
        matches!(self, TriggerVerdict::Fire(_))
    }
}

pub struct TriggerEvaluator {
    config: TriggerConfig,
}

impl TriggerEvaluator {
    pub fn new(config: TriggerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Evaluate `mint` against the history store and its current badge
    pub fn evaluate(&self, mint: &str, history: &SignalHistory, badge: Badge) -> TriggerVerdict {
        let have = history.len(mint);
        if have < self.config.min_samples {
            return TriggerVerdict::Wait(WaitReason::TooFewSamples {
                have,
                need: self.config.min_samples,
            });
        }

        // Both conditions: a dense burst must not fire early
        let span = history.span(mint).num_seconds();
        if span < self.config.min_span_secs as i64 {
            return TriggerVerdict::Wait(WaitReason::SpanTooShort {
                have_secs: span,
                need_secs: self.config.min_span_secs,
            });
        }

        let change_5m = history.latest(mint).map(|s| s.change_5m).unwrap_or(0.0);
        if change_5m <= 0.0 {
            return TriggerVerdict::Wait(WaitReason::PriceNotRising { change_5m });
        }

        let price_slope = history.slope(mint, SignalField::Change5m, self.config.slope_window);
        let score_slope = history.slope(mint, SignalField::Score, self.config.slope_window);
        if !(price_slope > 0.0 || score_slope > self.config.min_score_slope) {
            return TriggerVerdict::Wait(WaitReason::NoMomentum {
                price_slope,
                score_slope,
            });
        }

        let verdict = match badge {
            Badge::Pumping => TriggerVerdict::Fire(EntryMode::Momentum),
            Badge::Warming if self.config.allow_warm_ride => {
                TriggerVerdict::Fire(EntryMode::WarmRide)
            }
            other => TriggerVerdict::Wait(WaitReason::Badge(other)),
        };

        debug!(
            mint = %mint,
            samples = have,
            span_secs = span,
            change_5m,
            price_slope,
            score_slope,
            fires = verdict.fires(),
            "Trigger evaluated"
        );
        verdict
    }

    /// Readiness in [0, 1] used as a live ranking signal
    ///
    /// Observation progress counts for half, current momentum for the rest.
    pub fn readiness(&self, mint: &str, history: &SignalHistory) -> f64 {
        let samples = (history.len(mint) as f64 / self.config.min_samples as f64).min(1.0);
        let span = if self.config.min_span_secs == 0 {
            1.0
        } else {
            (history.span(mint).num_seconds().max(0) as f64 / self.config.min_span_secs as f64)
                .min(1.0)
        };
        let observed = samples.min(span);

        let price_slope = history.slope(mint, SignalField::Change5m, self.config.slope_window);
        let score_slope = history.slope(mint, SignalField::Score, self.config.slope_window);
        let momentum = if price_slope > 0.0 || score_slope > self.config.min_score_slope {
            1.0
        } else {
            0.0
        };

        0.5 * observed + 0.5 * momentum * observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SignalSample;
    use chrono::{Duration, Utc};

    fn config() -> TriggerConfig {
        TriggerConfig {
            min_samples: 4,
            min_span_secs: 45,
            slope_window: 3,
            min_score_slope: 0.5,
            allow_warm_ride: false,
            history_capacity: 100,
            sample_interval_ms: 1500,
            history_horizon_secs: 300,
        }
    }

    /// `count` rising samples evenly spread over `span_secs`
    fn rising(count: usize, span_secs: i64) -> SignalHistory {
        let history = SignalHistory::new(100);
        let t0 = Utc::now();
        let step = if count > 1 {
            span_secs * 1000 / (count as i64 - 1)
        } else {
            0
        };
        for i in 0..count {
            history.record(
                "M",
                SignalSample {
                    at: t0 + Duration::milliseconds(step * i as i64),
                    score: 10.0 + i as f64,
                    liquidity_usd: 20_000.0,
                    volume_1h: 10_000.0,
                    change_5m: 1.0 + i as f64,
                    change_1h: 5.0,
                },
            );
        }
        history
    }

    #[test]
    fn test_below_sample_threshold_never_fires() {
        let trigger = TriggerEvaluator::new(config());
        // Plenty of span, one sample short
        let verdict = trigger.evaluate("M", &rising(3, 120), Badge::Pumping);
        assert_eq!(
            verdict,
            TriggerVerdict::Wait(WaitReason::TooFewSamples { have: 3, need: 4 })
        );
    }

    #[test]
    fn test_below_span_threshold_never_fires() {
        let trigger = TriggerEvaluator::new(config());
        // Plenty of samples, just under the span
        let verdict = trigger.evaluate("M", &rising(20, 44), Badge::Pumping);
        assert!(matches!(
            verdict,
            TriggerVerdict::Wait(WaitReason::SpanTooShort { .. })
        ));
    }

    #[test]
    fn test_fires_just_above_both_thresholds() {
        let trigger = TriggerEvaluator::new(config());
        let verdict = trigger.evaluate("M", &rising(4, 45), Badge::Pumping);
        assert_eq!(verdict, TriggerVerdict::Fire(EntryMode::Momentum));
    }

    #[test]
    fn test_requires_hot_badge() {
        let trigger = TriggerEvaluator::new(config());
        let history = rising(5, 60);
        assert_eq!(
            trigger.evaluate("M", &history, Badge::Warming),
            TriggerVerdict::Wait(WaitReason::Badge(Badge::Warming))
        );

        let mut warm = config();
        warm.allow_warm_ride = true;
        let trigger = TriggerEvaluator::new(warm);
        assert_eq!(
            trigger.evaluate("M", &history, Badge::Warming),
            TriggerVerdict::Fire(EntryMode::WarmRide)
        );
        assert!(!trigger.evaluate("M", &history, Badge::Calm).fires());
    }

    #[test]
    fn test_requires_positive_change_and_momentum() {
        let trigger = TriggerEvaluator::new(config());
        let history = SignalHistory::new(100);
        let t0 = Utc::now();
        for i in 0..5 {
            history.record(
                "M",
                SignalSample {
                    at: t0 + Duration::seconds(15 * i),
                    score: 10.0,
                    liquidity_usd: 20_000.0,
                    volume_1h: 10_000.0,
                    change_5m: 5.0 - i as f64,
                    change_1h: 0.0,
                },
            );
        }
        // Positive but falling price change with flat score
        assert!(matches!(
            trigger.evaluate("M", &history, Badge::Pumping),
            TriggerVerdict::Wait(WaitReason::NoMomentum { .. })
        ));
    }

    #[test]
    fn test_readiness_grows_with_observation() {
        let trigger = TriggerEvaluator::new(config());
        let early = trigger.readiness("M", &rising(2, 10));
        let ready = trigger.readiness("M", &rising(6, 60));
        assert!(early < ready);
        assert!((ready - 1.0).abs() < 1e-9);
    }
}
