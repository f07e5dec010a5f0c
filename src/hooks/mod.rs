//! Query state machines that views bind to: paginated queries backed by
//! the query optimizer and the cache, and their live variant fed by a
//! change stream.

pub mod paginated;
pub mod realtime;

pub use paginated::{PaginatedQuery, QueryState};
pub use realtime::RealtimeQuery;
