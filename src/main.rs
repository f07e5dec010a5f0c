use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crm_cache::cache::{CacheConfig, CacheManager, FetchOptions, StorageType};
use crm_cache::db::{InMemoryDataSource, QueryOptimizer, QueryOptimizerConfig, QueryOptions, SortSpec};
use crm_cache::hooks::PaginatedQuery;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crm_cache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting crm-cache...");

    let config = CacheConfig::from_env();
    let cache = Arc::new(
        CacheManager::builder()
            .with_config(config)
            .build()
            .context("Failed to build cache")?,
    );

    if cache.start_cleanup().is_none() {
        warn!("Cache cleanup was already running");
    }

    match std::env::args().nth(1) {
        Some(url) => fetch_twice(&cache, &url).await?,
        None => {
            info!("No URL given, running the paginated query demo");
            query_demo(cache.clone()).await;
        }
    }

    for (storage, metrics) in cache.monitor().all_metrics() {
        info!(
            "{}: {} hits, {} misses, {} evictions, size {}, hit rate {:.0}%, p95 {:.2}ms",
            storage,
            metrics.hits,
            metrics.misses,
            metrics.evictions,
            metrics.size,
            metrics.hit_rate() * 100.0,
            metrics.latency.p95
        );
    }

    Ok(())
}

/// Second call is served from the cache
async fn fetch_twice(cache: &CacheManager, url: &str) -> Result<()> {
    for round in 1..=2 {
        let body: Value = cache
            .cached_fetch(url, FetchOptions::new())
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        info!("Round {}: {} bytes of JSON", round, body.to_string().len());
    }
    Ok(())
}

async fn query_demo(cache: Arc<CacheManager>) {
    let source = InMemoryDataSource::new();
    source.seed(
        "leads",
        (1..=42)
            .map(|i| json!({"id": i, "name": format!("Lead {}", i), "status": if i % 4 == 0 { "won" } else { "new" }}))
            .collect(),
    );

    let optimizer = Arc::new(QueryOptimizer::new(
        Arc::new(source),
        QueryOptimizerConfig::from_env(),
    ));
    let mut query = PaginatedQuery::open(
        "leads",
        optimizer,
        cache.clone(),
        QueryOptions::new().page_size(10).sort(SortSpec::asc("id")),
    )
    .await;

    query.set_page(2).await;
    query.update_filter("status", json!("won")).await;
    let state = query.state();
    info!(
        "Won leads: {} rows on page {} of {}",
        state.total_count,
        query.page(),
        state.total_pages
    );

    // Same options again: served from the memory tier
    query.reset_query().await;
    query.update_filter("status", json!("won")).await;
    info!(
        "Memory tier after demo: {} entries",
        cache.metrics(StorageType::Memory).size
    );
}
