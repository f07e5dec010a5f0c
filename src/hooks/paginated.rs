//! Paginated query state machine.
//!
//! Holds page, sort, filter and search options for one table and keeps a
//! [`QueryState`] in sync with them. Every option change re-runs the query;
//! results are cached in the memory tier under a key derived from the
//! table and the options.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::{CacheManager, DurationPreset, SetOptions, StorageType};
use crate::db::query_optimizer::{total_pages, PaginatedResult, QueryOptimizer, QueryOptions};
use crate::db::source::SortSpec;
use crate::utils::create_cache_key;

/// What a view renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub data: Vec<Value>,
    pub loading: bool,
    pub error: Option<String>,
    pub total_count: usize,
    pub total_pages: usize,
}

pub struct PaginatedQuery {
    table: String,
    optimizer: Arc<QueryOptimizer>,
    cache: Arc<CacheManager>,
    initial: QueryOptions,
    options: QueryOptions,
    cache_duration: DurationPreset,
    state: watch::Sender<QueryState>,
}

impl PaginatedQuery {
    /// Creates the query without loading; call [`load`](Self::load) or any
    /// setter to fetch
    pub fn new(
        table: impl Into<String>,
        optimizer: Arc<QueryOptimizer>,
        cache: Arc<CacheManager>,
        options: QueryOptions,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::default());
        Self {
            table: table.into(),
            optimizer,
            cache,
            initial: options.clone(),
            options,
            cache_duration: DurationPreset::Short,
            state,
        }
    }

    /// Creates the query and loads the first page
    pub async fn open(
        table: impl Into<String>,
        optimizer: Arc<QueryOptimizer>,
        cache: Arc<CacheManager>,
        options: QueryOptions,
    ) -> Self {
        let query = Self::new(table, optimizer, cache, options);
        query.load().await;
        query
    }

    pub fn with_cache_duration(mut self, preset: DurationPreset) -> Self {
        self.cache_duration = preset;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn page(&self) -> usize {
        self.options.page
    }

    /// Page size after the optimizer's cap
    pub fn effective_page_size(&self) -> usize {
        self.options
            .page_size
            .clamp(1, self.optimizer.config().max_page_size)
    }

    pub fn state(&self) -> QueryState {
        self.state.borrow().clone()
    }

    /// Receives every state transition, including loading flips
    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.state.subscribe()
    }

    /// Cache key of the current options
    pub fn cache_key(&self) -> String {
        create_cache_key(&format!("query:{}", self.table), &self.options)
    }

    /// Loads the current page, from cache when possible
    pub async fn load(&self) {
        self.run(false).await;
    }

    /// Reloads from the source, bypassing the cache
    pub async fn refresh(&self) {
        self.run(true).await;
    }

    pub async fn set_page(&mut self, page: usize) {
        let mut next = self.options.clone();
        next.page = page.max(1);
        self.apply(next).await;
    }

    pub async fn set_page_size(&mut self, page_size: usize) {
        let mut next = self.options.clone();
        next.page_size = page_size;
        next.page = 1;
        self.apply(next).await;
    }

    pub async fn set_sort(&mut self, sort: Option<SortSpec>) {
        let mut next = self.options.clone();
        next.sort = sort;
        next.page = 1;
        self.apply(next).await;
    }

    pub async fn set_filters(&mut self, filters: BTreeMap<String, Value>) {
        let mut next = self.options.clone();
        next.filters = filters;
        next.page = 1;
        self.apply(next).await;
    }

    /// Sets one filter; a null value clears it
    pub async fn update_filter(&mut self, column: impl Into<String>, value: Value) {
        let mut next = self.options.clone();
        let column = column.into();
        if value.is_null() {
            next.filters.remove(&column);
        } else {
            next.filters.insert(column, value);
        }
        next.page = 1;
        self.apply(next).await;
    }

    pub async fn set_search(&mut self, term: Option<String>) {
        let mut next = self.options.clone();
        next.search = term.filter(|t| !t.trim().is_empty());
        next.page = 1;
        self.apply(next).await;
    }

    /// Restores the options the query was created with
    pub async fn reset_query(&mut self) {
        let initial = self.initial.clone();
        self.apply(initial).await;
    }

    async fn apply(&mut self, next: QueryOptions) {
        if next == self.options {
            return;
        }
        self.options = next;
        self.load().await;
    }

    async fn run(&self, bypass_cache: bool) {
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let key = self.cache_key();
        if !bypass_cache {
            if let Some(cached) = self
                .cache
                .get_item::<PaginatedResult>(&key, StorageType::Memory)
                .await
            {
                debug!("Query {} served from cache", key);
                self.apply_result(cached);
                return;
            }
        }

        match self
            .optimizer
            .execute_paginated_query(&self.table, &self.options)
            .await
        {
            Ok(result) => {
                self.cache
                    .set_item(&key, &result, SetOptions::new().duration(self.cache_duration))
                    .await;
                self.apply_result(result);
            }
            Err(e) => {
                warn!("Query on {} failed: {}", self.table, e);
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.error = Some(e.to_string());
                });
            }
        }
    }

    fn apply_result(&self, result: PaginatedResult) {
        self.state.send_replace(QueryState {
            data: result.data,
            loading: false,
            error: None,
            total_count: result.count,
            total_pages: result.total_pages,
        });
    }

    /// Applies a local edit to the current state and drops the cached
    /// page, which no longer matches
    pub(crate) async fn modify_state(&self, edit: impl FnOnce(&mut QueryState) -> bool) -> bool {
        let page_size = self.effective_page_size();
        let changed = self.state.send_if_modified(|s| {
            let changed = edit(s);
            if changed {
                s.total_pages = total_pages(s.total_count, page_size);
            }
            changed
        });
        if changed {
            self.cache.remove_item(&self.cache_key(), StorageType::Memory).await;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryDataSource;
    use crate::db::query_optimizer::QueryOptimizerConfig;
    use crate::utils::ManualClock;
    use serde_json::json;

    fn query(rows: usize) -> PaginatedQuery {
        let source = InMemoryDataSource::new();
        source.seed(
            "leads",
            (1..=rows)
                .map(|i| json!({"id": i, "name": format!("Lead {}", i), "status": if i % 3 == 0 { "won" } else { "new" }}))
                .collect(),
        );
        let optimizer = Arc::new(QueryOptimizer::new(
            Arc::new(source),
            QueryOptimizerConfig::default(),
        ));
        let cache = Arc::new(
            CacheManager::builder()
                .with_clock(Arc::new(ManualClock::new(0)))
                .build()
                .unwrap(),
        );
        PaginatedQuery::new(
            "leads",
            optimizer,
            cache,
            QueryOptions::new().page_size(10).sort(SortSpec::asc("id")),
        )
    }

    #[tokio::test]
    async fn test_load_populates_state() {
        let query = query(25);
        query.load().await;

        let state = query.state();
        assert!(!state.loading);
        assert_eq!(state.data.len(), 10);
        assert_eq!(state.total_count, 25);
        assert_eq!(state.total_pages, 3);
    }

    #[tokio::test]
    async fn test_set_page_keeps_page() {
        let mut query = query(25);
        query.set_page(3).await;
        assert_eq!(query.page(), 3);
        assert_eq!(query.state().data.len(), 5);
    }

    #[tokio::test]
    async fn test_setters_reset_page() {
        let mut query = query(25);

        query.set_page(3).await;
        query.set_sort(Some(SortSpec::desc("id"))).await;
        assert_eq!(query.page(), 1);
        assert_eq!(query.state().data[0]["id"], 25);

        query.set_page(2).await;
        query.update_filter("status", json!("new")).await;
        assert_eq!(query.page(), 1);

        query.set_page(2).await;
        query.set_filters(BTreeMap::new()).await;
        assert_eq!(query.page(), 1);

        query.set_page(2).await;
        query.set_search(Some("Lead 1".into())).await;
        assert_eq!(query.page(), 1);

        query.set_page(2).await;
        query.set_page_size(5).await;
        assert_eq!(query.page(), 1);
    }

    #[tokio::test]
    async fn test_results_are_cached() {
        let query = query(5);
        query.load().await;

        let key = query.cache_key();
        assert!(key.starts_with("query:leads:"));
        let cached: Option<PaginatedResult> = query.cache.get_item(&key, StorageType::Memory).await;
        assert_eq!(cached.map(|r| r.count), Some(5));
    }

    #[tokio::test]
    async fn test_reset_query() {
        let mut query = query(25);
        query.set_page(2).await;
        query.update_filter("status", json!("won")).await;
        query.reset_query().await;
        assert_eq!(query.options(), &QueryOptions::new().page_size(10).sort(SortSpec::asc("id")));
        assert_eq!(query.state().total_count, 25);
    }

    #[tokio::test]
    async fn test_subscribe_sees_updates() {
        let mut query = query(3);
        let mut rx = query.subscribe();
        query.set_page(1).await;
        query.load().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().total_count, 3);
    }
}
