//! Frame record: the loaded/loading state of one interval.
//!
//! A frame is created the first time the scheduler needs its interval, is
//! populated asynchronously, becomes ready exactly once and is destroyed on
//! eviction.

use std::time::Instant;

use glam::Mat4;
use uuid::Uuid;

use crate::render::RenderableObject;

/// Update-cycle counter.
pub type Tick = u64;

pub struct Frame {
    /// Identifies the fetch that populates this slot; completions carrying
    /// another id are stale.
    pub request_id: Uuid,

    /// Decoded object, owned by this frame until destroyed.
    pub object: Option<Box<dyn RenderableObject>>,

    /// Per-interval transform (identity when the interval has none).
    pub transform: Mat4,

    /// When the fetch was issued.
    pub requested_at: Instant,

    /// Loaded through ordinary playback progression. Cleared when the frame
    /// goes untouched for more than one tick while loading.
    pub sequential: bool,

    pub ready: bool,

    /// Fetch or decode failed; the slot stays empty until evicted.
    pub failed: bool,

    /// Bytes added to the cache total when this frame became ready.
    pub resident_bytes: usize,

    pub last_touched: Tick,
}

impl Frame {
    pub fn new(transform: Option<Mat4>, tick: Tick) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            object: None,
            transform: transform.unwrap_or(Mat4::IDENTITY),
            requested_at: Instant::now(),
            sequential: true,
            ready: false,
            failed: false,
            resident_bytes: 0,
            last_touched: tick,
        }
    }

    pub fn touch(&mut self, tick: Tick) {
        self.last_touched = tick;
    }

    /// Whether the frame went untouched for at least one full tick before `tick`.
    pub fn skipped_before(&self, tick: Tick) -> bool {
        self.last_touched + 1 < tick
    }

    /// Release the decoded object. Returns the bytes this frame was holding.
    pub fn release(&mut self) -> usize {
        if let Some(mut object) = self.object.take() {
            object.destroy();
        }
        let bytes = if self.ready { self.resident_bytes } else { 0 };
        self.ready = false;
        self.resident_bytes = 0;
        bytes
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("request_id", &self.request_id)
            .field("has_object", &self.object.is_some())
            .field("sequential", &self.sequential)
            .field("ready", &self.ready)
            .field("failed", &self.failed)
            .field("resident_bytes", &self.resident_bytes)
            .field("last_touched", &self.last_touched)
            .finish()
    }
}
