//! Frame cache management.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`frame`]: Frame record and tick counter type
//! - [`frames`]: FrameCache, sparse slots with byte accounting
//! - [`evictor`]: Eviction policy (untouched-this-tick sweep)
//! - [`estimator`]: Moving average of sequential load times
//! - [`scheduler`]: Current / prefetch / render interval selection

pub mod estimator;
pub mod evictor;
pub mod frame;
pub mod frames;
pub mod scheduler;
