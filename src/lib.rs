//! time-dynamic-stream: a streaming frame cache for timeline playback.
//!
//! Given a timeline of disjoint intervals, each pointing at a remote frame
//! resource, the stream presents an already-loaded frame at every timeline
//! position while it:
//!   - fetches upcoming frames asynchronously,
//!   - predicts the prefetch horizon from a moving average of load times,
//!   - evicts frames that were not used this tick once over the memory budget.
//!
//! The render loop calls [`stream::TimeDynamicStream::update`] once per frame.

pub mod cache;
pub mod config;
pub mod render;
pub mod stream;
pub mod timeline;
pub mod transfer;

pub use stream::{StreamError, StreamEvent, StreamStats, TimeDynamicStream};
pub use timeline::{Clock, Interval, IntervalTimeline, SimulatedClock};
