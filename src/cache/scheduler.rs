//! Playback scheduling: which interval is current, which to prefetch next and
//! which ready interval to render.
//!
//! Strategy:
//! 1. Current interval: the one under the clock; none means an idle tick.
//! 2. Prefetch: look `average_load_time × multiplier` seconds ahead; if that
//!    lands in the current interval, step one interval in the playback
//!    direction. Paused clocks prefetch nothing.
//! 3. Render: scan from the current interval back toward the last ready
//!    anchor and take the first ready frame, holding the anchor otherwise.

use crate::cache::frame::Tick;
use crate::timeline::{Clock, IntervalTimeline, Timestamp};

/// Clock speed as seen by the scheduler: zero unless the clock is animating.
pub fn effective_multiplier<C: Clock + ?Sized>(clock: &C) -> f64 {
    if clock.is_animating() {
        clock.multiplier()
    } else {
        0.0
    }
}

/// Decisions for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickPlan {
    pub tick: Tick,
    pub current: usize,

    /// Anchor to search back toward when resolving the render interval.
    pub anchor: usize,

    /// Interval to prefetch, if any.
    pub next: Option<usize>,

    pub multiplier: f64,
}

/// Per-stream scheduling state carried across ticks.
#[derive(Debug, Clone, Default)]
pub struct PlaybackScheduler {
    previous: Option<usize>,
    next: Option<usize>,
    multiplier_last_seen: f64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last interval known to have produced a renderable frame.
    pub fn previous(&self) -> Option<usize> {
        self.previous
    }

    pub fn next(&self) -> Option<usize> {
        self.next
    }

    /// Plan a tick. Returns `None` when the clock is outside every interval;
    /// scheduling state is left untouched in that case.
    pub fn plan<C: Clock + ?Sized>(
        &mut self,
        tick: Tick,
        timeline: &IntervalTimeline,
        clock: &C,
        average_load_time: f64,
    ) -> Option<TickPlan> {
        let time = clock.current_time();
        let current = timeline.find_index(time)?;

        let multiplier = effective_multiplier(clock);
        let multiplier_changed = multiplier != self.multiplier_last_seen;
        self.multiplier_last_seen = multiplier;
        let paused = multiplier == 0.0;

        let anchor = match self.previous {
            Some(previous) if !paused => previous,
            _ => current,
        };

        let recompute = match self.next {
            None => true,
            Some(next) => multiplier_changed || Self::reached(current, next, multiplier),
        };
        if recompute {
            self.next =
                Self::next_interval(timeline, time, multiplier, current, average_load_time);
        }

        Some(TickPlan {
            tick,
            current,
            anchor,
            next: self.next,
            multiplier,
        })
    }

    /// Record the interval actually chosen for rendering this tick.
    pub fn commit(&mut self, previous: usize) {
        self.previous = Some(previous);
    }

    /// Drop all carried state (after the cache is cleared).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether playback has caught up with the prefetched interval.
    ///
    /// A zero multiplier always counts as reached so a paused clock re-plans
    /// (to "nothing") every tick.
    pub fn reached(current: usize, next: usize, multiplier: f64) -> bool {
        if multiplier > 0.0 {
            current >= next
        } else if multiplier < 0.0 {
            current <= next
        } else {
            true
        }
    }

    /// Interval the stream is predicted to need once the next load finishes.
    pub fn next_interval(
        timeline: &IntervalTimeline,
        time: Timestamp,
        multiplier: f64,
        current: usize,
        average_load_time: f64,
    ) -> Option<usize> {
        if multiplier == 0.0 {
            return None;
        }

        let predicted = time + average_load_time * multiplier;
        let index = timeline.find_index(predicted)?;
        if index != current {
            return Some(index);
        }

        let stepped = if multiplier >= 0.0 {
            current.checked_add(1)?
        } else {
            current.checked_sub(1)?
        };
        (stepped < timeline.len()).then_some(stepped)
    }

    /// Walk from `current` toward `anchor` and return the first index for
    /// which `try_ready` reports a ready frame, or `anchor` if none is.
    ///
    /// `try_ready` is expected to start or drive loading for indices that
    /// are not ready yet.
    pub fn nearest_ready<F>(anchor: usize, current: usize, mut try_ready: F) -> usize
    where
        F: FnMut(usize) -> bool,
    {
        if current >= anchor {
            for i in (anchor..=current).rev() {
                if try_ready(i) {
                    return i;
                }
            }
        } else {
            for i in current..=anchor {
                if try_ready(i) {
                    return i;
                }
            }
        }
        anchor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{Interval, SimulatedClock};

    fn timeline(n: usize) -> IntervalTimeline {
        let intervals = (0..n)
            .map(|i| Interval::new(i as f64, i as f64 + 1.0, format!("f{i}")))
            .collect();
        IntervalTimeline::new(intervals).unwrap()
    }

    fn clock_at(time: f64, multiplier: f64) -> SimulatedClock {
        let mut clock = SimulatedClock::new(0.0, 100.0);
        clock.set_time(time);
        clock.multiplier = multiplier;
        clock
    }

    #[test]
    fn test_next_interval_steps_past_current() {
        // 0.05 s ahead of 3.5 is still interval 3.
        let t = timeline(10);
        assert_eq!(PlaybackScheduler::next_interval(&t, 3.5, 1.0, 3, 0.05), Some(4));
        assert_eq!(PlaybackScheduler::next_interval(&t, 3.5, -1.0, 3, 0.05), Some(2));
    }

    #[test]
    fn test_next_interval_uses_prediction() {
        // 2 s load at 2x speed lands four intervals ahead.
        let t = timeline(10);
        assert_eq!(PlaybackScheduler::next_interval(&t, 3.5, 2.0, 3, 2.0), Some(7));
    }

    #[test]
    fn test_next_interval_bounds() {
        let t = timeline(3);
        assert_eq!(PlaybackScheduler::next_interval(&t, 2.5, 1.0, 2, 0.05), None);
        assert_eq!(PlaybackScheduler::next_interval(&t, 0.5, -1.0, 0, 0.05), None);
        assert_eq!(PlaybackScheduler::next_interval(&t, 1.5, 0.0, 1, 0.05), None);
        // Prediction past the end of the timeline.
        assert_eq!(PlaybackScheduler::next_interval(&t, 2.5, 1.0, 2, 5.0), None);
    }

    #[test]
    fn test_reached() {
        assert!(PlaybackScheduler::reached(5, 5, 1.0));
        assert!(!PlaybackScheduler::reached(4, 5, 1.0));
        assert!(PlaybackScheduler::reached(3, 4, -1.0));
        assert!(!PlaybackScheduler::reached(5, 4, -1.0));
        assert!(PlaybackScheduler::reached(4, 5, 0.0));
    }

    #[test]
    fn test_plan_outside_timeline_is_idle() {
        let mut scheduler = PlaybackScheduler::new();
        let plan = scheduler.plan(1, &timeline(3), &clock_at(50.0, 1.0), 0.05);
        assert!(plan.is_none());
        assert_eq!(scheduler.next(), None);
    }

    #[test]
    fn test_paused_anchor_follows_current() {
        let t = timeline(10);
        let mut scheduler = PlaybackScheduler::new();
        scheduler.commit(2);

        let mut clock = clock_at(7.5, 1.0);
        clock.should_animate = false;
        let plan = scheduler.plan(1, &t, &clock, 0.05).unwrap();
        assert_eq!(plan.anchor, 7);
        assert_eq!(plan.next, None);
        assert_eq!(plan.multiplier, 0.0);
    }

    #[test]
    fn test_next_kept_until_reached() {
        let t = timeline(10);
        let mut scheduler = PlaybackScheduler::new();

        let plan = scheduler.plan(1, &t, &clock_at(3.5, 1.0), 0.05).unwrap();
        assert_eq!(plan.next, Some(4));

        // Still inside interval 3: keep prefetching 4.
        let plan = scheduler.plan(2, &t, &clock_at(3.9, 1.0), 0.05).unwrap();
        assert_eq!(plan.next, Some(4));

        // Reached 4: re-plan to 5.
        let plan = scheduler.plan(3, &t, &clock_at(4.1, 1.0), 0.05).unwrap();
        assert_eq!(plan.next, Some(5));
    }

    #[test]
    fn test_direction_reversal_replans() {
        let t = timeline(10);
        let mut scheduler = PlaybackScheduler::new();
        scheduler.plan(1, &t, &clock_at(3.5, 1.0), 0.05).unwrap();

        let plan = scheduler.plan(2, &t, &clock_at(3.5, -1.0), 0.05).unwrap();
        assert_eq!(plan.next, Some(2));
    }

    #[test]
    fn test_nearest_ready_backward_scan() {
        let mut visited = Vec::new();
        let found = PlaybackScheduler::nearest_ready(2, 5, |i| {
            visited.push(i);
            i == 3
        });
        assert_eq!(found, 3);
        assert_eq!(visited, vec![5, 4, 3]);
    }

    #[test]
    fn test_nearest_ready_forward_scan() {
        let mut visited = Vec::new();
        let found = PlaybackScheduler::nearest_ready(6, 2, |i| {
            visited.push(i);
            false
        });
        assert_eq!(found, 6);
        assert_eq!(visited, vec![2, 3, 4, 5, 6]);
    }
}
