//! Moving frame data from remote resources into the cache.
//!
//! - [`fetcher`]: async byte fetch for file and HTTP resources
//! - [`loader`]: FrameLoader, fetch issue / completion queue / readiness priming

pub mod fetcher;
pub mod loader;
