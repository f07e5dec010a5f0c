//! In-process data source with a change feed.
//!
//! Backs tests and the demo binary. Writes are broadcast as
//! [`ChangeEvent`]s to every subscriber.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::source::{
    AggregateRequest, ChangeEvent, ChangeKind, DataSource, SelectRequest, SelectResponse,
};

const CHANGE_FEED_CAPACITY: usize = 256;

pub struct InMemoryDataSource {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    changes: broadcast::Sender<ChangeEvent>,
    latency: Option<Duration>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            tables: RwLock::new(HashMap::new()),
            changes,
            latency: None,
        }
    }

    /// Delays every call, like a remote round trip
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replaces a table's rows without emitting changes
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(table.to_string(), rows);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .map(|t| t.get(table).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Deletes rows whose `id_field` equals `id` and returns them
    pub async fn delete(&self, table: &str, id_field: &str, id: &Value) -> Result<Vec<Value>> {
        self.simulate_latency().await;
        let removed = {
            let mut tables = self.tables.write().map_err(|_| anyhow!("table lock poisoned"))?;
            let rows = tables.entry(table.to_string()).or_default();
            let (removed, kept): (Vec<Value>, Vec<Value>) = rows
                .drain(..)
                .partition(|row| row.get(id_field) == Some(id));
            *rows = kept;
            removed
        };
        for row in &removed {
            self.emit(table, ChangeKind::Delete, None, Some(row.clone()));
        }
        Ok(removed)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn emit(&self, table: &str, kind: ChangeKind, new: Option<Value>, old: Option<Value>) {
        // No subscribers is fine
        let _ = self.changes.send(ChangeEvent {
            table: table.to_string(),
            kind,
            new,
            old,
        });
    }

    fn rows(&self, table: &str) -> Result<Vec<Value>> {
        let tables = self.tables.read().map_err(|_| anyhow!("table lock poisoned"))?;
        Ok(tables.get(table).cloned().unwrap_or_default())
    }
}

impl Default for InMemoryDataSource {
    fn default() -> Self {
        Self::new()
    }
}

fn project(row: &Value, select: &str) -> Value {
    let select = select.trim();
    if select.is_empty() || select == "*" {
        return row.clone();
    }
    let mut projected = serde_json::Map::new();
    for column in select.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if let Some(value) = row.get(column) {
            projected.insert(column.to_string(), value.clone());
        }
    }
    Value::Object(projected)
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    async fn select(&self, request: &SelectRequest) -> Result<SelectResponse> {
        self.simulate_latency().await;

        let mut matched: Vec<Value> = self
            .rows(&request.table)?
            .into_iter()
            .filter(|row| request.matches(row))
            .collect();
        let count = matched.len();

        if let Some(ref sort) = request.sort {
            matched.sort_by(|a, b| sort.compare(a, b));
        }

        let page: Vec<Value> = match request.range {
            Some((from, to)) => matched
                .into_iter()
                .skip(from)
                .take(to.saturating_sub(from) + 1)
                .collect(),
            None => matched,
        };

        let mut data: Vec<Value> = page.iter().map(|row| project(row, &request.select)).collect();

        for join in &request.joins {
            let foreign = self.rows(&join.table)?;
            for (row, source) in data.iter_mut().zip(&page) {
                let local = source.get(&join.local_key);
                let related: Vec<Value> = foreign
                    .iter()
                    .filter(|f| local.is_some() && f.get(&join.foreign_key) == local)
                    .cloned()
                    .collect();
                if let Value::Object(map) = row {
                    map.insert(join.alias.clone(), Value::Array(related));
                }
            }
        }

        debug!("select {} -> {} of {} rows", request.table, data.len(), count);
        Ok(SelectResponse { data, count })
    }

    async fn aggregate(&self, request: &AggregateRequest) -> Result<Value> {
        self.simulate_latency().await;

        let rows: Vec<Value> = self
            .rows(&request.table)?
            .into_iter()
            .filter(|row| {
                request
                    .filters
                    .iter()
                    .all(|(column, expected)| row.get(column) == Some(expected))
            })
            .collect();
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get(&request.column).and_then(Value::as_f64))
            .collect();

        Ok(request.aggregation.apply(rows.len(), &values))
    }

    async fn insert(&self, table: &str, records: &[Value]) -> Result<Vec<Value>> {
        self.simulate_latency().await;
        {
            let mut tables = self.tables.write().map_err(|_| anyhow!("table lock poisoned"))?;
            tables
                .entry(table.to_string())
                .or_default()
                .extend(records.iter().cloned());
        }
        for record in records {
            self.emit(table, ChangeKind::Insert, Some(record.clone()), None);
        }
        Ok(records.to_vec())
    }

    async fn update(&self, table: &str, records: &[Value], id_field: &str) -> Result<Vec<Value>> {
        self.simulate_latency().await;

        let mut changes = Vec::new();
        {
            let mut tables = self.tables.write().map_err(|_| anyhow!("table lock poisoned"))?;
            let rows = tables.entry(table.to_string()).or_default();
            for record in records {
                let id = record
                    .get(id_field)
                    .with_context(|| format!("record without {}", id_field))?;
                let Some(row) = rows.iter_mut().find(|row| row.get(id_field) == Some(id)) else {
                    continue;
                };
                let old = row.clone();
                if let (Value::Object(target), Value::Object(patch)) = (&mut *row, record) {
                    for (column, value) in patch {
                        target.insert(column.clone(), value.clone());
                    }
                }
                changes.push((old, row.clone()));
            }
        }

        let mut updated = Vec::with_capacity(changes.len());
        for (old, new) in changes {
            self.emit(table, ChangeKind::Update, Some(new.clone()), Some(old));
            updated.push(new);
        }
        Ok(updated)
    }

    fn source_name(&self) -> &str {
        "memory"
    }
}
