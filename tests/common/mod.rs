//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use time_dynamic_stream::config::StreamConfig;
use time_dynamic_stream::render::{
    BoundingSphere, DecodeError, Decoder, DrawCommand, FrameControls, RenderContext,
    RenderableObject,
};
use time_dynamic_stream::timeline::{Interval, IntervalTimeline, SimulatedClock};
use time_dynamic_stream::transfer::fetcher::MemoryFetcher;
use time_dynamic_stream::TimeDynamicStream;

/// Object whose byte size is its payload length and which becomes ready
/// after a fixed number of updates.
pub struct SizedObject {
    size: usize,
    updates: usize,
    ready_after: usize,
    controls: FrameControls,
    destroyed: Arc<AtomicUsize>,
}

impl RenderableObject for SizedObject {
    fn is_ready(&self) -> bool {
        self.updates >= self.ready_after
    }

    fn byte_size(&self) -> usize {
        self.size
    }

    fn point_count(&self) -> usize {
        self.size
    }

    fn bounding_sphere(&self) -> Option<BoundingSphere> {
        Some(BoundingSphere {
            center: glam::Vec3::ZERO,
            radius: self.size as f32,
        })
    }

    fn controls(&self) -> &FrameControls {
        &self.controls
    }

    fn controls_mut(&mut self) -> &mut FrameControls {
        &mut self.controls
    }

    fn update(&mut self, ctx: &mut RenderContext) {
        self.updates += 1;
        ctx.commands.push(DrawCommand {
            model_matrix: self.controls.model_matrix,
            vertex_count: self.size,
            shadows: self.controls.shadows,
        });
    }

    fn destroy(&mut self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Payloads starting with `BAD` fail to decode.
#[derive(Clone)]
pub struct SizedDecoder {
    pub ready_after: usize,
    pub destroyed: Arc<AtomicUsize>,
}

impl SizedDecoder {
    pub fn new(ready_after: usize) -> Self {
        Self {
            ready_after,
            destroyed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Decoder for SizedDecoder {
    fn decode(&self, bytes: Bytes) -> Result<Box<dyn RenderableObject>, DecodeError> {
        if bytes.starts_with(b"BAD") {
            return Err(DecodeError::BadMagic(*b"BAD!"));
        }
        Ok(Box::new(SizedObject {
            size: bytes.len(),
            updates: 0,
            ready_after: self.ready_after,
            controls: FrameControls::default(),
            destroyed: Arc::clone(&self.destroyed),
        }))
    }
}

/// `n` back-to-back intervals of `length` seconds, uris `frame{i}`.
pub fn timeline(n: usize, length: f64) -> IntervalTimeline {
    let intervals = (0..n)
        .map(|i| {
            let start = i as f64 * length;
            Interval::new(start, start + length, format!("frame{i}"))
        })
        .collect();
    IntervalTimeline::new(intervals).unwrap()
}

/// Fetcher serving `frame{i}` as `size` bytes each.
pub fn fetcher(n: usize, size: usize) -> MemoryFetcher {
    let fetcher = MemoryFetcher::new();
    for i in 0..n {
        fetcher.insert(format!("frame{i}"), vec![0u8; size]);
    }
    fetcher
}

pub fn stream(
    n: usize,
    length: f64,
    fetcher: &MemoryFetcher,
    decoder: &SizedDecoder,
) -> TimeDynamicStream<SimulatedClock> {
    let (start, stop) = (0.0, n as f64 * length);
    TimeDynamicStream::new(
        SimulatedClock::new(start, stop),
        timeline(n, length),
        Arc::new(fetcher.clone()),
        Arc::new(decoder.clone()),
        &StreamConfig::default(),
    )
    .unwrap()
}

/// Let spawned fetch tasks run to completion.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// One render frame: settle fetches, then tick.
pub async fn frame(stream: &mut TimeDynamicStream<SimulatedClock>, ctx: &mut RenderContext) {
    settle().await;
    ctx.commands.clear();
    stream.update(ctx).unwrap();
}
