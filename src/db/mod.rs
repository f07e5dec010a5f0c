//! Data access: the remote source seam, an in-process source and the
//! query optimizer.

pub mod memory;
pub mod query_optimizer;
pub mod source;

pub use memory::InMemoryDataSource;
pub use query_optimizer::{
    execute_with_timeout, PaginatedResult, QueryOptimizer, QueryOptimizerConfig, QueryOptions,
};
pub use source::{
    AggregateRequest, Aggregation, ChangeEvent, ChangeKind, Condition, DataSource, JoinClause,
    SelectRequest, SelectResponse, SortSpec,
};
