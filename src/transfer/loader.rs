//! Frame loader: issues fetches, delivers completions at the tick boundary
//! and drives not-yet-ready frames toward readiness.
//!
//! Fetch+decode runs as a tokio task. Its result is queued on a channel and
//! only applied to the cache when the stream drains the queue at the start
//! of a tick, so all cache mutation stays on the update thread. A completion
//! whose slot was evicted (or re-requested) in the meantime is discarded.

use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::estimator::LoadTimeEstimator;
use crate::cache::frame::{Frame, Tick};
use crate::cache::frames::FrameCache;
use crate::render::{DecodeError, Decoder, RenderContext, RenderSettings, RenderableObject};
use crate::timeline::Interval;
use crate::transfer::fetcher::{FetchError, Fetcher};

/// Why a frame could not be loaded.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to decode frame: {0}")]
    Decode(#[from] DecodeError),
}

/// Result of a fetch task, delivered back to the update thread.
pub struct FetchCompletion {
    pub index: usize,
    pub request_id: Uuid,
    pub uri: String,
    pub result: Result<Box<dyn RenderableObject>, LoadError>,
}

/// A load failure surfaced to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFailure {
    pub index: usize,
    pub uri: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub frames_requested: u64,
    pub frames_ready: u64,
    pub frames_failed: u64,
    pub stale_completions: u64,
}

pub struct FrameLoader {
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<dyn Decoder>,
    runtime: Handle,
    completion_tx: mpsc::UnboundedSender<FetchCompletion>,
    completion_rx: mpsc::UnboundedReceiver<FetchCompletion>,
    in_flight: usize,
    stats: LoaderStats,
}

impl FrameLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>, decoder: Arc<dyn Decoder>, runtime: Handle) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            fetcher,
            decoder,
            runtime,
            completion_tx,
            completion_rx,
            in_flight: 0,
            stats: LoaderStats::default(),
        }
    }

    /// Fetches issued whose completion has not been drained yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    /// Create the frame for `index` and start fetching it, unless the slot
    /// is already occupied. Returns whether a fetch was issued.
    pub fn ensure(
        &mut self,
        cache: &mut FrameCache,
        index: usize,
        interval: &Interval,
        tick: Tick,
    ) -> bool {
        if cache.contains(index) {
            return false;
        }

        let frame = cache.insert(index, Frame::new(interval.transform_matrix(), tick));
        let request_id = frame.request_id;
        let uri = interval.uri.clone();

        debug!(index, uri = %uri, %request_id, "Requesting frame");

        let fetcher = Arc::clone(&self.fetcher);
        let decoder = Arc::clone(&self.decoder);
        let tx = self.completion_tx.clone();
        self.runtime.spawn(async move {
            let result = match fetcher.fetch_bytes(&uri).await {
                Ok(bytes) => decoder.decode(bytes).map_err(LoadError::from),
                Err(e) => Err(LoadError::from(e)),
            };
            let completion = FetchCompletion {
                index,
                request_id,
                uri,
                result,
            };
            // Receiver closed by shutdown or dropped with the loader.
            if let Err(mpsc::error::SendError(completion)) = tx.send(completion) {
                if let Ok(mut object) = completion.result {
                    object.destroy();
                }
            }
        });

        self.in_flight += 1;
        self.stats.frames_requested += 1;
        true
    }

    /// Apply every queued completion to the cache. Returns the failures for
    /// frames that are still cached; stale completions are dropped silently.
    pub fn drain(&mut self, cache: &mut FrameCache) -> Vec<FrameFailure> {
        let mut failures = Vec::new();

        while let Ok(completion) = self.completion_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            let FetchCompletion {
                index,
                request_id,
                uri,
                result,
            } = completion;

            let slot = cache
                .get_mut(index)
                .filter(|frame| frame.request_id == request_id);

            match (slot, result) {
                (Some(frame), Ok(object)) => {
                    debug!(index, uri = %uri, "Frame fetched");
                    frame.object = Some(object);
                }
                (Some(frame), Err(e)) => {
                    frame.failed = true;
                    self.stats.frames_failed += 1;
                    failures.push(FrameFailure {
                        index,
                        uri,
                        message: e.to_string(),
                    });
                }
                (None, Ok(mut object)) => {
                    object.destroy();
                    self.stats.stale_completions += 1;
                    debug!(index, uri = %uri, "Dropped completion for evicted frame");
                }
                (None, Err(e)) => {
                    self.stats.stale_completions += 1;
                    debug!(index, uri = %uri, error = %e, "Dropped failure for evicted frame");
                }
            }
        }

        failures
    }

    /// Stop accepting completions and destroy every decoded object still
    /// queued. Fetches that finish afterwards destroy their own result.
    /// Returns how many objects were released.
    pub fn shutdown(&mut self) -> usize {
        self.completion_rx.close();
        let mut released = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            if let Ok(mut object) = completion.result {
                object.destroy();
                released += 1;
            }
        }
        released
    }

    /// Drive the frame at `index` one step toward readiness and mark it
    /// touched. Draw commands produced while priming are discarded.
    /// Returns whether the frame is ready.
    pub fn advance(
        &mut self,
        cache: &mut FrameCache,
        estimator: &mut LoadTimeEstimator,
        index: usize,
        settings: &RenderSettings,
        ctx: &mut RenderContext,
        tick: Tick,
    ) -> bool {
        let Some(frame) = cache.get_mut(index) else {
            return false;
        };

        if frame.skipped_before(tick) {
            // Requested, abandoned and picked up again (e.g. after scrubbing
            // away and back): the load time says nothing about playback.
            frame.sequential = false;
        }

        let mut became_ready = None;
        if !frame.ready && frame.object.is_some() {
            let commands_before = ctx.commands.len();
            Self::render(frame, settings, ctx, tick);
            ctx.commands.truncate(commands_before);

            if let Some(object) = frame.object.as_ref().filter(|o| o.is_ready()) {
                became_ready = Some((
                    object.byte_size(),
                    frame.sequential,
                    frame.requested_at.elapsed(),
                ));
            }
        }
        frame.touch(tick);

        match became_ready {
            Some((bytes, sequential, elapsed)) => {
                cache.mark_ready(index, bytes);
                self.stats.frames_ready += 1;
                if sequential {
                    estimator.record(elapsed);
                }
                debug!(
                    index,
                    bytes,
                    sequential,
                    load_secs = elapsed.as_secs_f64(),
                    "Frame ready"
                );
                true
            }
            None => cache.ready(index).is_some(),
        }
    }

    /// Push the stream settings into the frame and run one object update.
    pub fn render(frame: &mut Frame, settings: &RenderSettings, ctx: &mut RenderContext, tick: Tick) {
        let transform = frame.transform;
        match frame.object.as_mut() {
            Some(object) => {
                settings.apply(transform, object.as_mut());
                object.update(ctx);
            }
            None => warn!("Render requested for a frame without a decoded object"),
        }
        frame.touch(tick);
    }
}
