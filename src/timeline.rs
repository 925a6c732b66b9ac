//! Interval timeline and playback clock.
//!
//! The timeline is an ordered list of disjoint, half-open `[start, end)`
//! intervals. An interval's identity is its index; every cache slot is keyed
//! by that index.

use std::path::Path;

use glam::Mat4;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timeline position in seconds.
pub type Timestamp = f64;

#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("Interval {index} is empty or reversed: [{start}, {end})")]
    EmptyInterval {
        index: usize,
        start: Timestamp,
        end: Timestamp,
    },

    #[error("Interval {index} starts at {start} before the previous interval ends at {previous_end}")]
    Overlap {
        index: usize,
        start: Timestamp,
        previous_end: Timestamp,
    },

    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One time range and the frame resource it shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,

    /// Resource to fetch for this interval.
    pub uri: String,

    /// Optional column-major 4x4 transform applied to this frame.
    #[serde(default)]
    pub transform: Option<[f32; 16]>,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp, uri: impl Into<String>) -> Self {
        Self {
            start,
            end,
            uri: uri.into(),
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = Some(transform.to_cols_array());
        self
    }

    pub fn contains(&self, time: Timestamp) -> bool {
        time >= self.start && time < self.end
    }

    pub fn transform_matrix(&self) -> Option<Mat4> {
        self.transform.as_ref().map(Mat4::from_cols_array)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    intervals: Vec<Interval>,
}

/// Ordered, indexable collection of disjoint intervals.
#[derive(Debug, Clone, Default)]
pub struct IntervalTimeline {
    intervals: Vec<Interval>,
}

impl IntervalTimeline {
    /// Build a timeline, validating order and disjointness.
    pub fn new(intervals: Vec<Interval>) -> Result<Self, TimelineError> {
        for (index, interval) in intervals.iter().enumerate() {
            if !(interval.end > interval.start) {
                return Err(TimelineError::EmptyInterval {
                    index,
                    start: interval.start,
                    end: interval.end,
                });
            }
            if index > 0 {
                let previous_end = intervals[index - 1].end;
                if interval.start < previous_end {
                    return Err(TimelineError::Overlap {
                        index,
                        start: interval.start,
                        previous_end,
                    });
                }
            }
        }
        Ok(Self { intervals })
    }

    /// Load a `{ "intervals": [...] }` manifest.
    pub fn from_json_file(path: &Path) -> Result<Self, TimelineError> {
        let data = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&data)?;
        Self::new(manifest.intervals)
    }

    /// Index of the interval containing `time`, if any.
    pub fn find_index(&self, time: Timestamp) -> Option<usize> {
        // First interval whose start is after `time`, minus one.
        let after = self.intervals.partition_point(|i| i.start <= time);
        let index = after.checked_sub(1)?;
        self.intervals[index].contains(time).then_some(index)
    }

    pub fn get(&self, index: usize) -> Option<&Interval> {
        self.intervals.get(index)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Start of the first interval and end of the last.
    pub fn span(&self) -> Option<(Timestamp, Timestamp)> {
        Some((self.intervals.first()?.start, self.intervals.last()?.end))
    }
}

/// Playback clock consumed by the stream.
pub trait Clock {
    fn current_time(&self) -> Timestamp;

    /// Whether the clock is advancing on its own.
    fn is_animating(&self) -> bool;

    /// Signed speed: the sign is the playback direction.
    fn multiplier(&self) -> f64;
}

/// What a [`SimulatedClock`] does when it reaches an end of its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClockRange {
    #[default]
    Unbounded,
    /// Stop at `start` / `stop`.
    Clamped,
    /// Wrap from `stop` back to `start` (forward) or the reverse.
    LoopStop,
}

/// A clock driven by explicit `tick` calls.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    pub current_time: Timestamp,
    pub start: Timestamp,
    pub stop: Timestamp,
    pub multiplier: f64,
    pub can_animate: bool,
    pub should_animate: bool,
    pub range: ClockRange,
}

impl SimulatedClock {
    pub fn new(start: Timestamp, stop: Timestamp) -> Self {
        Self {
            current_time: start,
            start,
            stop,
            multiplier: 1.0,
            can_animate: true,
            should_animate: true,
            range: ClockRange::Unbounded,
        }
    }

    pub fn with_range(mut self, range: ClockRange) -> Self {
        self.range = range;
        self
    }

    pub fn set_time(&mut self, time: Timestamp) {
        self.current_time = time;
    }

    /// Advance by `real_dt` wall seconds scaled by the multiplier.
    pub fn tick(&mut self, real_dt: f64) -> Timestamp {
        if !self.is_animating() {
            return self.current_time;
        }

        let mut time = self.current_time + real_dt * self.multiplier;
        match self.range {
            ClockRange::Unbounded => {}
            ClockRange::Clamped => time = time.clamp(self.start, self.stop),
            ClockRange::LoopStop => {
                let length = self.stop - self.start;
                if length > 0.0 && (time >= self.stop || time < self.start) {
                    time = self.start + (time - self.start).rem_euclid(length);
                }
            }
        }
        self.current_time = time;
        time
    }
}

impl Clock for SimulatedClock {
    fn current_time(&self) -> Timestamp {
        self.current_time
    }

    fn is_animating(&self) -> bool {
        self.can_animate && self.should_animate
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_intervals() -> IntervalTimeline {
        IntervalTimeline::new(vec![
            Interval::new(0.0, 10.0, "a"),
            Interval::new(10.0, 20.0, "b"),
            Interval::new(20.0, 30.0, "c"),
        ])
        .unwrap()
    }

    #[test]
    fn test_find_index() {
        let timeline = three_intervals();
        assert_eq!(timeline.find_index(0.0), Some(0));
        assert_eq!(timeline.find_index(9.99), Some(0));
        assert_eq!(timeline.find_index(10.0), Some(1));
        assert_eq!(timeline.find_index(25.0), Some(2));
        assert_eq!(timeline.find_index(30.0), None);
        assert_eq!(timeline.find_index(-1.0), None);
    }

    #[test]
    fn test_find_index_in_gap() {
        let timeline = IntervalTimeline::new(vec![
            Interval::new(0.0, 1.0, "a"),
            Interval::new(2.0, 3.0, "b"),
        ])
        .unwrap();
        assert_eq!(timeline.find_index(1.5), None);
        assert_eq!(timeline.find_index(2.5), Some(1));
    }

    #[test]
    fn test_rejects_overlap() {
        let result = IntervalTimeline::new(vec![
            Interval::new(0.0, 10.0, "a"),
            Interval::new(5.0, 20.0, "b"),
        ]);
        assert!(matches!(result, Err(TimelineError::Overlap { index: 1, .. })));
    }

    #[test]
    fn test_rejects_empty_interval() {
        let result = IntervalTimeline::new(vec![Interval::new(3.0, 3.0, "a")]);
        assert!(matches!(result, Err(TimelineError::EmptyInterval { .. })));
    }

    #[test]
    fn test_manifest_transform() {
        let json = r#"{ "intervals": [
            { "start": 0.0, "end": 1.0, "uri": "f0.tdpc" },
            { "start": 1.0, "end": 2.0, "uri": "f1.tdpc",
              "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 5,0,0,1] }
        ] }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        let timeline = IntervalTimeline::new(manifest.intervals).unwrap();
        assert!(timeline.get(0).unwrap().transform_matrix().is_none());
        let m = timeline.get(1).unwrap().transform_matrix().unwrap();
        assert_eq!(m.w_axis.x, 5.0);
    }

    #[test]
    fn test_simulated_clock_loop() {
        let mut clock = SimulatedClock::new(0.0, 30.0).with_range(ClockRange::LoopStop);
        clock.set_time(29.0);
        clock.tick(2.0);
        assert!((clock.current_time - 1.0).abs() < 1e-9);

        clock.multiplier = -1.0;
        clock.set_time(0.5);
        clock.tick(1.0);
        assert!((clock.current_time - 29.5).abs() < 1e-9);
    }

    #[test]
    fn test_paused_clock_does_not_move() {
        let mut clock = SimulatedClock::new(0.0, 30.0);
        clock.should_animate = false;
        clock.tick(5.0);
        assert_eq!(clock.current_time, 0.0);
        assert!(!clock.is_animating());
    }
}
