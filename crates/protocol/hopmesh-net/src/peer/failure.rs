//! Phi-accrual failure detector.
//!
//! Instead of a fixed timeout the detector reports a suspicion level `phi`
//! derived from the distribution of past heartbeat inter-arrival times:
//! `phi = -log10(P(heartbeat arrives later than now))`. A phi of 8 means the
//! current silence would happen by chance about once in 10^8 heartbeats.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::PeerConfig;

#[derive(Debug, Clone)]
pub(crate) struct PhiAccrualDetector {
    intervals: VecDeque<f64>,
    window: usize,
    threshold: f64,
    min_std_dev_ms: f64,
    acceptable_pause_ms: f64,
    last_heartbeat: Option<Instant>,
}

impl PhiAccrualDetector {
    /// Create a detector seeded with the expected heartbeat interval.
    pub fn new(config: &PeerConfig) -> Self {
        let window = config.failure_window.max(2);
        let expected = config.ping_interval.as_secs_f64() * 1000.0;
        let mut intervals = VecDeque::with_capacity(window);
        // seed with mean = expected, std dev = expected / 4
        intervals.push_back(expected - expected / 4.0);
        intervals.push_back(expected + expected / 4.0);

        Self {
            intervals,
            window,
            threshold: config.failure_threshold,
            min_std_dev_ms: config.failure_min_std_dev.as_secs_f64() * 1000.0,
            acceptable_pause_ms: config.ping_interval.as_secs_f64() * 1000.0,
            last_heartbeat: None,
        }
    }

    /// Record a heartbeat arrival.
    pub fn heartbeat(&mut self, now: Instant) {
        if let Some(last) = self.last_heartbeat {
            let interval = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
            if self.intervals.len() == self.window {
                self.intervals.pop_front();
            }
            self.intervals.push_back(interval);
        }
        self.last_heartbeat = Some(now);
    }

    fn mean(&self) -> f64 {
        self.intervals.iter().sum::<f64>() / self.intervals.len() as f64
    }

    fn std_dev(&self, mean: f64) -> f64 {
        let variance = self
            .intervals
            .iter()
            .map(|i| (i - mean) * (i - mean))
            .sum::<f64>()
            / self.intervals.len() as f64;
        variance.sqrt().max(self.min_std_dev_ms)
    }

    /// Current suspicion level. Zero before the first heartbeat.
    pub fn phi(&self, now: Instant) -> f64 {
        let Some(last) = self.last_heartbeat else {
            return 0.0;
        };
        let elapsed = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
        let mean = self.mean() + self.acceptable_pause_ms;
        let std_dev = self.std_dev(self.mean());

        // logistic approximation of the normal CDF
        let y = (elapsed - mean) / std_dev;
        let e = (-y * (1.5976 + 0.070566 * y * y)).exp();
        if elapsed > mean {
            -(e / (1.0 + e)).log10()
        } else {
            -(1.0 - 1.0 / (1.0 + e)).log10()
        }
    }

    /// Whether phi exceeds the configured threshold.
    pub fn is_failed(&self, now: Instant) -> bool {
        self.phi(now) > self.threshold
    }

    /// Time since the last heartbeat, if any.
    pub fn silence(&self, now: Instant) -> Option<Duration> {
        self.last_heartbeat
            .map(|last| now.saturating_duration_since(last))
    }
}
