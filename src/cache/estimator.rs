//! Moving average of recent sequential frame load times.
//!
//! Drives the prefetch horizon: the scheduler looks `average × multiplier`
//! seconds ahead of the clock. Only loads that happened during ordinary
//! playback are recorded, so scrubbing does not skew the estimate.

use std::time::Duration;

/// Fixed-width ring buffer of load durations (seconds).
#[derive(Debug, Clone)]
pub struct LoadTimeEstimator {
    samples: Vec<f64>,
    sum: f64,
    count: usize,
    cursor: usize,
    fallback: f64,
}

impl LoadTimeEstimator {
    /// `window` samples (at least one), returning `fallback` until the first record.
    pub fn new(window: usize, fallback: f64) -> Self {
        Self {
            samples: vec![0.0; window.max(1)],
            sum: 0.0,
            count: 0,
            cursor: 0,
            fallback,
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.record_secs(duration.as_secs_f64());
    }

    /// Fold a sample in, overwriting the oldest once the window is full.
    pub fn record_secs(&mut self, secs: f64) {
        self.sum += secs - self.samples[self.cursor];
        self.samples[self.cursor] = secs;
        self.count = (self.count + 1).min(self.samples.len());
        self.cursor = (self.cursor + 1) % self.samples.len();
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return self.fallback;
        }
        self.sum / self.count as f64
    }

    pub fn sample_count(&self) -> usize {
        self.count
    }

    pub fn window(&self) -> usize {
        self.samples.len()
    }
}

impl Default for LoadTimeEstimator {
    fn default() -> Self {
        Self::new(5, 0.05)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_before_samples() {
        let estimator = LoadTimeEstimator::default();
        assert_eq!(estimator.average(), 0.05);
        assert_eq!(estimator.sample_count(), 0);
    }

    #[test]
    fn test_average_and_window_overwrite() {
        let mut estimator = LoadTimeEstimator::new(5, 0.05);
        for secs in [2.0, 4.0, 6.0, 8.0, 10.0] {
            estimator.record_secs(secs);
        }
        assert!((estimator.average() - 6.0).abs() < 1e-12);

        // Oldest sample (2) drops out.
        estimator.record_secs(12.0);
        assert!((estimator.average() - 8.0).abs() < 1e-12);
        assert_eq!(estimator.sample_count(), 5);
    }

    #[test]
    fn test_partial_window() {
        let mut estimator = LoadTimeEstimator::new(5, 0.05);
        estimator.record(Duration::from_millis(100));
        estimator.record(Duration::from_millis(300));
        assert!((estimator.average() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_zero_window_clamped() {
        let mut estimator = LoadTimeEstimator::new(0, 0.05);
        assert_eq!(estimator.window(), 1);
        estimator.record_secs(1.0);
        estimator.record_secs(3.0);
        assert_eq!(estimator.average(), 3.0);
    }
}
