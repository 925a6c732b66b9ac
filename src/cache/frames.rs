//! Frame cache: sparse slots indexed by interval, plus byte accounting.
//!
//! A non-empty slot means a fetch was already issued for that interval (or
//! the frame is ready); the slot itself is the de-duplication key. The byte
//! total only ever counts ready frames, each exactly once.

use tracing::{debug, info};

use crate::cache::evictor::{EvictionCandidate, Evictor};
use crate::cache::frame::{Frame, Tick};

/// Usage snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Occupied slots, loading or ready.
    pub frame_count: usize,
    pub ready_count: usize,
    pub bytes_used: usize,
    pub budget_bytes: usize,
}

impl CacheStats {
    /// Usage as a fraction of the budget.
    pub fn usage_fraction(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }
        self.bytes_used as f64 / self.budget_bytes as f64
    }
}

pub struct FrameCache {
    slots: Vec<Option<Frame>>,
    total_bytes: usize,
    budget_bytes: usize,
    evictor: Evictor,
}

impl FrameCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            slots: Vec::new(),
            total_bytes: 0,
            budget_bytes,
            evictor: Evictor::new(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.slots.get_mut(index)?.as_mut()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// The frame at `index` if it is ready to render.
    pub fn ready(&self, index: usize) -> Option<&Frame> {
        self.get(index).filter(|frame| frame.ready)
    }

    /// Place a new frame in an empty slot. An occupied slot is left as is.
    pub fn insert(&mut self, index: usize, frame: Frame) -> &mut Frame {
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index].get_or_insert(frame)
    }

    pub fn touch(&mut self, index: usize, tick: Tick) {
        if let Some(frame) = self.get_mut(index) {
            frame.touch(tick);
        }
    }

    /// Flag the frame ready and add its bytes to the total. Returns false if
    /// the slot is empty or the frame was already ready.
    pub fn mark_ready(&mut self, index: usize, bytes: usize) -> bool {
        let Some(frame) = self.get_mut(index) else {
            return false;
        };
        if frame.ready {
            return false;
        }
        frame.ready = true;
        frame.resident_bytes = bytes;
        self.total_bytes += bytes;
        true
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn set_budget_bytes(&mut self, budget_bytes: usize) {
        self.budget_bytes = budget_bytes;
    }

    pub fn over_budget(&self) -> bool {
        self.total_bytes > self.budget_bytes
    }

    /// Destroy the frame at `index`, subtract its bytes and clear the slot.
    pub fn evict(&mut self, index: usize) -> Option<usize> {
        let mut frame = self.slots.get_mut(index)?.take()?;
        let freed = frame.release();
        self.total_bytes = self.total_bytes.saturating_sub(freed);
        debug!(index, freed, "Evicted frame");
        Some(freed)
    }

    /// If over budget, evict every frame not touched during `tick`.
    /// Returns the evicted indices.
    pub fn evict_untouched(&mut self, tick: Tick) -> Vec<usize> {
        if !self.over_budget() {
            return Vec::new();
        }

        let victims: Vec<EvictionCandidate> = self.evictor.select_victims(self.iter(), tick);
        let before = self.total_bytes;
        let mut evicted = Vec::with_capacity(victims.len());
        for victim in victims {
            if self.evict(victim.index).is_some() {
                evicted.push(victim.index);
            }
        }

        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                freed = before - self.total_bytes,
                bytes_used = self.total_bytes,
                budget = self.budget_bytes,
                "Eviction round complete"
            );
        }
        evicted
    }

    /// Destroy every frame. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        for index in 0..self.slots.len() {
            if self.evict(index).is_some() {
                dropped += 1;
            }
        }
        self.slots.clear();
        dropped
    }

    /// Broadcast dirty flags to every decoded object.
    pub fn mark_all(&mut self, clipping_planes_dirty: bool, style_dirty: bool) {
        for frame in self.slots.iter_mut().flatten() {
            if let Some(object) = frame.object.as_mut() {
                let controls = object.controls_mut();
                controls.clipping_planes_dirty = clipping_planes_dirty;
                controls.style_dirty = style_dirty;
            }
        }
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Frame)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|frame| (index, frame)))
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            bytes_used: self.total_bytes,
            budget_bytes: self.budget_bytes,
            ..Default::default()
        };
        for (_, frame) in self.iter() {
            stats.frame_count += 1;
            if frame.ready {
                stats.ready_count += 1;
            }
        }
        stats
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCache")
            .field("stats", &self.stats())
            .finish()
    }
}
