//! Time-dynamic stream: the per-tick orchestrator.
//!
//! Each `update`:
//! 1. Applies fetch completions queued since the last tick
//! 2. Propagates style / clipping dirty state to every cached frame
//! 3. Plans the tick (current, prefetch and anchor intervals)
//! 4. Resolves the nearest ready frame, renders it and primes the prefetch
//! 5. Raises frame-changed / first-frame notifications
//! 6. Evicts untouched frames when over the memory budget

use std::sync::Arc;

use glam::Mat4;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::cache::estimator::LoadTimeEstimator;
use crate::cache::frame::Tick;
use crate::cache::frames::FrameCache;
use crate::cache::scheduler::PlaybackScheduler;
use crate::config::{ShadingConfig, StreamConfig};
use crate::render::{
    BoundingSphere, ClippingPlanes, Decoder, RenderContext, RenderSettings, ShadowMode,
};
use crate::timeline::{Clock, IntervalTimeline};
use crate::transfer::fetcher::Fetcher;
use crate::transfer::loader::{FrameFailure, FrameLoader};

const EVENT_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("No tokio runtime available to run frame fetches: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Stream used after destroy()")]
    Destroyed,
}

/// Notifications raised by the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A frame's fetch or decode failed. Not retried.
    FrameFailed { uri: String, message: String },

    /// A different frame is now being rendered.
    FrameChanged { index: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_requested: u64,
    pub frames_ready: u64,
    pub frames_failed: u64,
    pub frames_evicted: u64,
    pub stale_completions: u64,
    pub frames_cached: usize,
    pub bytes_used: usize,
}

pub struct TimeDynamicStream<C> {
    /// Render frames at all.
    pub show: bool,

    /// Applied on top of every frame's own transform.
    pub model_matrix: Mat4,

    pub shadows: ShadowMode,

    pub shading: ShadingConfig,

    clock: C,
    timeline: IntervalTimeline,
    cache: FrameCache,
    loader: FrameLoader,
    estimator: LoadTimeEstimator,
    scheduler: PlaybackScheduler,

    clipping_planes: Option<Box<dyn ClippingPlanes>>,
    clipping_planes_state: u32,
    style_dirty: bool,

    /// Scene time of the first update, for time-since-load styling.
    load_timestamp: Option<f64>,

    tick: Tick,

    /// Index of the frame rendered last tick. A lookup key only; the cache
    /// owns the frame and clears this when evicting it.
    last_rendered: Option<usize>,

    events: broadcast::Sender<StreamEvent>,
    ready_tx: watch::Sender<bool>,
    frames_evicted: u64,
    destroyed: bool,
}

impl<C: Clock> TimeDynamicStream<C> {
    /// Create a stream whose fetches run on the current tokio runtime.
    pub fn new(
        clock: C,
        timeline: IntervalTimeline,
        fetcher: Arc<dyn Fetcher>,
        decoder: Arc<dyn Decoder>,
        config: &StreamConfig,
    ) -> Result<Self, StreamError> {
        let runtime = Handle::try_current()?;
        Ok(Self::with_runtime(clock, timeline, fetcher, decoder, config, runtime))
    }

    /// Create a stream whose fetches run on `runtime`.
    pub fn with_runtime(
        clock: C,
        timeline: IntervalTimeline,
        fetcher: Arc<dyn Fetcher>,
        decoder: Arc<dyn Decoder>,
        config: &StreamConfig,
        runtime: Handle,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (ready_tx, _) = watch::channel(false);

        info!(
            intervals = timeline.len(),
            budget_bytes = config.memory_budget_bytes(),
            "Stream created"
        );

        Self {
            show: config.show,
            model_matrix: Mat4::IDENTITY,
            shadows: config.shadows,
            shading: ShadingConfig::default(),
            clock,
            timeline,
            cache: FrameCache::new(config.memory_budget_bytes()),
            loader: FrameLoader::new(fetcher, decoder, runtime),
            estimator: LoadTimeEstimator::new(
                config.load_time_window,
                config.initial_load_time_secs,
            ),
            scheduler: PlaybackScheduler::new(),
            clipping_planes: None,
            clipping_planes_state: 0,
            style_dirty: false,
            load_timestamp: None,
            tick: 0,
            last_rendered: None,
            events,
            ready_tx,
            frames_evicted: 0,
            destroyed: false,
        }
    }

    /// Advance one tick. Call exactly once per rendered frame.
    pub fn update(&mut self, ctx: &mut RenderContext) -> Result<(), StreamError> {
        if self.destroyed {
            return Err(StreamError::Destroyed);
        }
        if ctx.morphing || !self.show {
            return Ok(());
        }

        for failure in self.loader.drain(&mut self.cache) {
            self.report_failure(failure);
        }

        self.tick += 1;
        let tick = self.tick;

        let settings = self.prepare_settings(ctx);

        let Some(plan) = self.scheduler.plan(
            tick,
            &self.timeline,
            &self.clock,
            self.estimator.average(),
        ) else {
            return Ok(());
        };

        let previous = PlaybackScheduler::nearest_ready(plan.anchor, plan.current, |index| {
            self.try_ready(index, &settings, ctx, tick)
        });
        self.scheduler.commit(previous);

        let frame = if self.cache.ready(previous).is_some() {
            Some(previous)
        } else {
            // Start of playback or scrubbed onto an unloaded interval: keep
            // showing the last frame until this one is ready.
            self.load(previous, &settings, ctx, tick);
            self.last_rendered
                .filter(|&index| self.cache.ready(index).is_some())
        };

        if let Some(index) = frame {
            if let Some(rendered) = self.cache.get_mut(index) {
                FrameLoader::render(rendered, &settings, ctx, tick);
            }
        }

        if let Some(next) = plan.next {
            self.load(next, &settings, ctx, tick);
        }

        if let Some(index) = frame {
            if self.last_rendered.is_none() {
                self.ready_tx.send_if_modified(|ready| !std::mem::replace(ready, true));
            }
            if self.last_rendered != Some(index) {
                debug!(index, tick, "Frame changed");
                if self.events.receiver_count() > 0 {
                    let _ = self.events.send(StreamEvent::FrameChanged { index });
                }
            }
        }
        self.last_rendered = frame;

        let evicted = self.cache.evict_untouched(tick);
        self.frames_evicted += evicted.len() as u64;
        if self.last_rendered.is_some_and(|index| evicted.contains(&index)) {
            self.last_rendered = None;
        }

        Ok(())
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }
}

impl<C> TimeDynamicStream<C> {
    /// Receive frame-failed / frame-changed events. Failures are logged
    /// instead while nobody is subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Flips to `true` the first tick any frame is rendered.
    pub fn ready_signal(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Re-evaluate the style on every frame next tick.
    pub fn make_style_dirty(&mut self) {
        self.style_dirty = true;
    }

    pub fn set_clipping_planes(&mut self, planes: Option<Box<dyn ClippingPlanes>>) {
        self.clipping_planes = planes;
    }

    /// Broadcast dirty flags to every cached frame's controls.
    pub fn mark_all_frames(&mut self, clipping_planes_dirty: bool, style_dirty: bool) {
        self.cache.mark_all(clipping_planes_dirty, style_dirty);
    }

    /// Drop the frame for `index` so the next tick that needs it fetches it
    /// again. This is the only way to retry a failed frame.
    pub fn reload_interval(&mut self, index: usize) -> bool {
        let evicted = self.cache.evict(index).is_some();
        if evicted {
            self.frames_evicted += 1;
            if self.last_rendered == Some(index) {
                self.last_rendered = None;
            }
        }
        evicted
    }

    pub fn total_bytes_used(&self) -> usize {
        self.cache.total_bytes()
    }

    pub fn memory_budget_bytes(&self) -> usize {
        self.cache.budget_bytes()
    }

    /// Takes effect at the end of the next tick.
    pub fn set_memory_budget_bytes(&mut self, budget_bytes: usize) {
        self.cache.set_budget_bytes(budget_bytes);
    }

    /// Bounding volume of the frame being rendered.
    pub fn current_bounding_sphere(&self) -> Option<BoundingSphere> {
        self.cache
            .get(self.last_rendered?)?
            .object
            .as_ref()?
            .bounding_sphere()
    }

    pub fn average_load_time(&self) -> f64 {
        self.estimator.average()
    }

    /// Anchor: the interval resolved for rendering last tick.
    pub fn previous_interval(&self) -> Option<usize> {
        self.scheduler.previous()
    }

    pub fn next_interval(&self) -> Option<usize> {
        self.scheduler.next()
    }

    pub fn rendered_interval(&self) -> Option<usize> {
        self.last_rendered
    }

    pub fn timeline(&self) -> &IntervalTimeline {
        &self.timeline
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn stats(&self) -> StreamStats {
        let loader = self.loader.stats();
        let cache = self.cache.stats();
        StreamStats {
            frames_requested: loader.frames_requested,
            frames_ready: loader.frames_ready,
            frames_failed: loader.frames_failed,
            frames_evicted: self.frames_evicted,
            stale_completions: loader.stale_completions,
            frames_cached: cache.frame_count,
            bytes_used: cache.bytes_used,
        }
    }

    /// Release every cached frame, every decoded object still waiting in the
    /// completion queue and the clipping collaborator. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        let released = self.loader.shutdown();
        let dropped = self.cache.clear();
        self.clipping_planes = None;
        self.last_rendered = None;
        self.scheduler.reset();
        self.destroyed = true;
        info!(dropped, released, "Stream destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Update clipping state, flush dirty flags and snapshot this tick's
    /// render settings.
    fn prepare_settings(&mut self, ctx: &RenderContext) -> RenderSettings {
        let load_timestamp = *self.load_timestamp.get_or_insert(ctx.time);
        let time_since_load_ms = ((ctx.time - load_timestamp) * 1000.0).max(0.0);

        let mut is_clipped = false;
        let mut clipping_planes_state = 0;
        if let Some(planes) = self.clipping_planes.as_mut().filter(|p| p.enabled()) {
            planes.update(ctx);
            clipping_planes_state = planes.state();
            is_clipped = true;
        }
        let clipping_planes_dirty = clipping_planes_state != self.clipping_planes_state;
        self.clipping_planes_state = clipping_planes_state;

        let style_dirty = std::mem::take(&mut self.style_dirty);
        if clipping_planes_dirty || style_dirty {
            self.cache.mark_all(clipping_planes_dirty, style_dirty);
        }

        RenderSettings {
            model_matrix: self.model_matrix,
            shadows: self.shadows,
            shading: self.shading.clone(),
            time_since_load_ms,
            is_clipped,
        }
    }

    /// Render-candidate check for one scanned interval: ready frames win,
    /// loading frames are driven once, missing frames start fetching.
    ///
    /// A clock jump while playing scans every interval between the anchor and
    /// the new position, so it issues one fetch per missing interval in that
    /// range. Those frames go untouched afterwards and are the first evicted
    /// once the cache is over budget.
    fn try_ready(
        &mut self,
        index: usize,
        settings: &RenderSettings,
        ctx: &mut RenderContext,
        tick: Tick,
    ) -> bool {
        if self.cache.ready(index).is_some() {
            return true;
        }
        if self.cache.contains(index) {
            return self.loader.advance(
                &mut self.cache,
                &mut self.estimator,
                index,
                settings,
                ctx,
                tick,
            );
        }
        if let Some(interval) = self.timeline.get(index) {
            self.loader.ensure(&mut self.cache, index, interval, tick);
        }
        false
    }

    /// Fetch the frame if needed, then drive it.
    fn load(&mut self, index: usize, settings: &RenderSettings, ctx: &mut RenderContext, tick: Tick) {
        if let Some(interval) = self.timeline.get(index) {
            self.loader.ensure(&mut self.cache, index, interval, tick);
        }
        self.loader
            .advance(&mut self.cache, &mut self.estimator, index, settings, ctx, tick);
    }

    fn report_failure(&self, failure: FrameFailure) {
        if self.events.receiver_count() > 0 {
            let _ = self.events.send(StreamEvent::FrameFailed {
                uri: failure.uri,
                message: failure.message,
            });
        } else {
            warn!(
                index = failure.index,
                uri = %failure.uri,
                error = %failure.message,
                "A frame failed to load"
            );
        }
    }
}

impl<C> Drop for TimeDynamicStream<C> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<C> std::fmt::Debug for TimeDynamicStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeDynamicStream")
            .field("tick", &self.tick)
            .field("cache", &self.cache)
            .field("previous", &self.scheduler.previous())
            .field("next", &self.scheduler.next())
            .field("last_rendered", &self.last_rendered)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
