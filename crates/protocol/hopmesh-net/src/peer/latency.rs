use std::collections::VecDeque;
use std::time::Duration;

/// Sliding window of round-trip samples.
#[derive(Debug, Clone)]
pub(crate) struct LatencyWindow {
    samples: VecDeque<u32>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record a sample in milliseconds, evicting the oldest when full.
    pub fn record(&mut self, ms: u32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
    }

    /// Record an elapsed duration, saturating at `u32::MAX` ms.
    pub fn record_duration(&mut self, elapsed: Duration) {
        let ms = u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX);
        self.record(ms);
    }

    /// Mean of the recorded samples, if any.
    pub fn mean(&self) -> Option<u32> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|&s| s as u64).sum();
        Some((sum / self.samples.len() as u64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_has_no_mean() {
        assert_eq!(LatencyWindow::new(6).mean(), None);
    }

    #[test]
    fn test_mean_over_last_samples() {
        let mut window = LatencyWindow::new(3);
        for ms in [100, 10, 20, 30] {
            window.record(ms);
        }
        // 100 was evicted
        assert_eq!(window.mean(), Some(20));
    }

    #[test]
    fn test_zero_sample() {
        let mut window = LatencyWindow::new(6);
        window.record(0);
        assert_eq!(window.mean(), Some(0));
    }

    #[test]
    fn test_duration_saturates() {
        let mut window = LatencyWindow::new(1);
        window.record_duration(Duration::from_secs(u64::MAX / 1000));
        assert_eq!(window.mean(), Some(u32::MAX));
    }
}
