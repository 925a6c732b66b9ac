//! Eviction policy: decides which frames to drop when over budget.
//!
//! The sweep is coarse. Any frame that was neither rendered nor
//! fetched-for during the current tick is a victim; there is no recency
//! ranking beyond that. The only guarantee is that frames in use this tick
//! survive.

use crate::cache::frame::{Frame, Tick};

/// A frame selected for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub index: usize,

    /// Bytes that eviction will free (zero for frames that never became ready).
    pub bytes: usize,
}

/// Eviction policy engine.
#[derive(Debug, Clone, Default)]
pub struct Evictor;

impl Evictor {
    pub fn new() -> Self {
        Self
    }

    /// Whether a frame may be evicted at `tick`.
    pub fn is_evictable(&self, frame: &Frame, tick: Tick) -> bool {
        frame.last_touched < tick
    }

    /// Every occupied slot not touched during `tick`, in index order.
    pub fn select_victims<'a>(
        &self,
        frames: impl Iterator<Item = (usize, &'a Frame)>,
        tick: Tick,
    ) -> Vec<EvictionCandidate> {
        frames
            .filter(|(_, frame)| self.is_evictable(frame, tick))
            .map(|(index, frame)| EvictionCandidate {
                index,
                bytes: if frame.ready { frame.resident_bytes } else { 0 },
            })
            .collect()
    }
}
