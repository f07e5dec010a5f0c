//! Query optimizer.
//!
//! Builds paginated, aggregate and join selects for a [`DataSource`], races
//! every call against a timeout and splits bulk writes into sequential
//! chunks.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{QueryError, QueryResult};

use super::source::{
    AggregateRequest, Aggregation, Condition, DataSource, JoinClause, SelectRequest, SortSpec,
};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_PAGE_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptimizerConfig {
    pub timeout: Duration,
    pub max_page_size: usize,
    pub max_batch_size: usize,
}

impl Default for QueryOptimizerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_QUERY_TIMEOUT,
            max_page_size: MAX_PAGE_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
        }
    }
}

impl QueryOptimizerConfig {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Loads configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: std::env::var("QUERY_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_page_size: std::env::var("QUERY_MAX_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.max_page_size),
            max_batch_size: std::env::var("QUERY_MAX_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.max_batch_size),
        }
    }
}

/// Page, filter, search and sort options of a paginated query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub page: usize,
    pub page_size: usize,
    pub select: Option<String>,
    pub filters: BTreeMap<String, Value>,
    pub search: Option<String>,
    pub search_fields: Vec<String>,
    pub sort: Option<SortSpec>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            select: None,
            filters: BTreeMap::new(),
            search: None,
            search_fields: Vec::new(),
            sort: None,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn filter(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.insert(column.into(), value);
        self
    }

    pub fn search(mut self, term: impl Into<String>, fields: &[&str]) -> Self {
        self.search = Some(term.into());
        self.search_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// One page of rows plus totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult {
    pub data: Vec<Value>,
    pub count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

/// Races `future` against `timeout`.
///
/// On timeout the future is dropped, which cancels the underlying call.
pub async fn execute_with_timeout<T, F>(future: F, timeout: Duration) -> QueryResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(QueryError::Source),
        Err(_) => {
            warn!("Query timed out after {:?}", timeout);
            Err(QueryError::Timeout(timeout))
        }
    }
}

pub fn total_pages(count: usize, page_size: usize) -> usize {
    if page_size == 0 {
        0
    } else {
        count.div_ceil(page_size)
    }
}

pub struct QueryOptimizer {
    source: Arc<dyn DataSource>,
    config: QueryOptimizerConfig,
}

impl QueryOptimizer {
    pub fn new(source: Arc<dyn DataSource>, config: QueryOptimizerConfig) -> Self {
        info!(
            "Initializing QueryOptimizer on {} (timeout: {:?}, page cap: {}, batch: {})",
            source.source_name(),
            config.timeout,
            config.max_page_size,
            config.max_batch_size
        );
        Self { source, config }
    }

    pub fn config(&self) -> &QueryOptimizerConfig {
        &self.config
    }

    /// Clamped (page, page_size)
    fn page_bounds(&self, options: &QueryOptions) -> (usize, usize) {
        let page_size = options.page_size.clamp(1, self.config.max_page_size);
        (options.page.max(1), page_size)
    }

    /// Builds the select for one page of `table`.
    ///
    /// Null filters are skipped; every other value is an equality
    /// constraint, empty strings included. The search term is an OR
    /// of case-insensitive matches across the search fields.
    pub fn build_select_request(&self, table: &str, options: &QueryOptions) -> SelectRequest {
        let (page, page_size) = self.page_bounds(options);
        let offset = (page - 1) * page_size;

        let mut request = SelectRequest::new(table);
        if let Some(ref select) = options.select {
            request.select = select.clone();
        }
        request.filters = options
            .filters
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();

        if let Some(term) = options.search.as_deref().map(str::trim) {
            if !term.is_empty() && !options.search_fields.is_empty() {
                request.search = Some(Condition::search(&options.search_fields, term));
            }
        }

        request.sort = options.sort.clone();
        request.range = Some((offset, offset + page_size - 1));
        request
    }

    pub async fn execute_paginated_query(
        &self,
        table: &str,
        options: &QueryOptions,
    ) -> QueryResult<PaginatedResult> {
        let request = self.build_select_request(table, options);
        self.run_page(request, options).await
    }

    /// Paginated query with related rows embedded
    pub async fn execute_join_query(
        &self,
        table: &str,
        joins: &[JoinClause],
        options: &QueryOptions,
    ) -> QueryResult<PaginatedResult> {
        let mut request = self.build_select_request(table, options);
        request.joins = joins.to_vec();
        self.run_page(request, options).await
    }

    async fn run_page(
        &self,
        request: SelectRequest,
        options: &QueryOptions,
    ) -> QueryResult<PaginatedResult> {
        let (page, page_size) = self.page_bounds(options);
        debug!(
            "Paginated query on {} (page {}, size {})",
            request.table, page, page_size
        );

        let response =
            execute_with_timeout(self.source.select(&request), self.config.timeout).await?;

        Ok(PaginatedResult {
            total_pages: total_pages(response.count, page_size),
            data: response.data,
            count: response.count,
            page,
            page_size,
        })
    }

    pub async fn execute_aggregate_query(
        &self,
        table: &str,
        aggregation: Aggregation,
        column: &str,
        filters: &BTreeMap<String, Value>,
    ) -> QueryResult<Value> {
        let column = match aggregation {
            Aggregation::Count if column.is_empty() => "*",
            Aggregation::Count => column,
            Aggregation::Sum | Aggregation::Avg | Aggregation::Min | Aggregation::Max => {
                if column.is_empty() || column == "*" {
                    return Err(QueryError::InvalidRequest(format!(
                        "{} needs a column",
                        aggregation
                    )));
                }
                column
            }
        };

        let request = AggregateRequest {
            table: table.to_string(),
            aggregation,
            column: column.to_string(),
            filters: filters
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(c, v)| (c.clone(), v.clone()))
                .collect(),
        };

        debug!("Aggregate {}({}) on {}", aggregation, column, table);
        execute_with_timeout(self.source.aggregate(&request), self.config.timeout).await
    }

    /// Inserts `records` in chunks of at most `max_batch_size`, one chunk at
    /// a time. The first failing chunk aborts the rest.
    pub async fn batch_insert(&self, table: &str, records: &[Value]) -> QueryResult<Vec<Value>> {
        let mut inserted = Vec::with_capacity(records.len());
        for (index, chunk) in records.chunks(self.config.max_batch_size).enumerate() {
            debug!("Inserting chunk {} ({} rows) into {}", index + 1, chunk.len(), table);
            let rows =
                execute_with_timeout(self.source.insert(table, chunk), self.config.timeout).await?;
            inserted.extend(rows);
        }
        info!("Batch inserted {} rows into {}", inserted.len(), table);
        Ok(inserted)
    }

    /// Updates `records` by `id_field` in sequential chunks.
    ///
    /// Every record must carry the id field; that is checked before any
    /// chunk is sent.
    pub async fn batch_update(
        &self,
        table: &str,
        records: &[Value],
        id_field: &str,
    ) -> QueryResult<Vec<Value>> {
        if let Some(position) = records
            .iter()
            .position(|r| r.get(id_field).map_or(true, Value::is_null))
        {
            return Err(QueryError::InvalidRequest(format!(
                "record {} has no {}",
                position, id_field
            )));
        }

        let mut updated = Vec::with_capacity(records.len());
        for (index, chunk) in records.chunks(self.config.max_batch_size).enumerate() {
            debug!("Updating chunk {} ({} rows) in {}", index + 1, chunk.len(), table);
            let rows = execute_with_timeout(
                self.source.update(table, chunk, id_field),
                self.config.timeout,
            )
            .await?;
            updated.extend(rows);
        }
        info!("Batch updated {} rows in {}", updated.len(), table);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryDataSource;
    use serde_json::json;

    fn optimizer(rows: usize) -> QueryOptimizer {
        let source = InMemoryDataSource::new();
        source.seed(
            "leads",
            (1..=rows)
                .map(|i| json!({"id": i, "name": format!("Lead {}", i), "status": if i % 2 == 0 { "won" } else { "new" }}))
                .collect(),
        );
        QueryOptimizer::new(Arc::new(source), QueryOptimizerConfig::default())
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(20, 20), 1);
        assert_eq!(total_pages(21, 20), 2);
    }

    #[test]
    fn test_build_select_request() {
        let optimizer = optimizer(0);
        let options = QueryOptions::new()
            .page(3)
            .page_size(500)
            .filter("status", json!("new"))
            .filter("owner_id", Value::Null)
            .filter("tag", json!(""))
            .search("acme", &["name", "email"]);

        let request = optimizer.build_select_request("leads", &options);
        assert_eq!(request.range, Some((200, 299)));
        assert_eq!(request.filters.len(), 2);
        assert_eq!(request.filters.get("tag"), Some(&json!("")));
        assert!(!request.filters.contains_key("owner_id"));
        assert!(matches!(request.search, Some(Condition::Or(ref c)) if c.len() == 2));
    }

    #[test]
    fn test_blank_search_ignored() {
        let optimizer = optimizer(0);
        let options = QueryOptions::new().search("  ", &["name"]);
        assert!(optimizer.build_select_request("leads", &options).search.is_none());
    }

    #[tokio::test]
    async fn test_paginated_query() {
        let optimizer = optimizer(45);
        let result = optimizer
            .execute_paginated_query("leads", &QueryOptions::new().page(3).sort(SortSpec::asc("id")))
            .await
            .unwrap();

        assert_eq!(result.count, 45);
        assert_eq!(result.total_pages, 3);
        assert_eq!(result.data.len(), 5);
        assert_eq!(result.data[0]["id"], 41);
    }

    #[tokio::test]
    async fn test_aggregate_dispatch() {
        let optimizer = optimizer(4);
        let filters = BTreeMap::new();
        let count = optimizer
            .execute_aggregate_query("leads", Aggregation::Count, "", &filters)
            .await
            .unwrap();
        assert_eq!(count, json!(4));

        let max = optimizer
            .execute_aggregate_query("leads", Aggregation::Max, "id", &filters)
            .await
            .unwrap();
        assert_eq!(max, json!(4.0));

        let invalid = optimizer
            .execute_aggregate_query("leads", Aggregation::Avg, "", &filters)
            .await;
        assert!(matches!(invalid, Err(QueryError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_batch_update_requires_ids() {
        let optimizer = optimizer(2);
        let result = optimizer
            .batch_update("leads", &[json!({"id": 1}), json!({"name": "x"})], "id")
            .await;
        assert!(matches!(result, Err(QueryError::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, anyhow::Error>(1)
        };
        let result = execute_with_timeout(slow, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(QueryError::Timeout(_))));

        let fast = async { Ok::<_, anyhow::Error>(2) };
        assert_eq!(execute_with_timeout(fast, Duration::from_secs(30)).await.unwrap(), 2);

        let failing = async { Err::<i32, _>(anyhow::anyhow!("boom")) };
        assert!(matches!(
            execute_with_timeout(failing, Duration::from_secs(30)).await,
            Err(QueryError::Source(_))
        ));
    }
}
