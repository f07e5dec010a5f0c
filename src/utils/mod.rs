//! Small shared helpers: wall clock abstraction and cache key construction.

pub mod cache_key;
pub mod clock;

pub use cache_key::create_cache_key;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
