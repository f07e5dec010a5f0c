//! Live paginated query.
//!
//! Wraps a [`PaginatedQuery`] and applies row changes from the source's
//! change feed to the loaded page instead of re-running the query. A feed
//! that lagged behind triggers a full refresh.

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::db::source::{ChangeEvent, ChangeKind};

use super::paginated::PaginatedQuery;

pub struct RealtimeQuery {
    query: PaginatedQuery,
    changes: broadcast::Receiver<ChangeEvent>,
    id_field: String,
}

impl RealtimeQuery {
    pub fn new(
        query: PaginatedQuery,
        changes: broadcast::Receiver<ChangeEvent>,
        id_field: impl Into<String>,
    ) -> Self {
        Self {
            query,
            changes,
            id_field: id_field.into(),
        }
    }

    pub fn query(&self) -> &PaginatedQuery {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut PaginatedQuery {
        &mut self.query
    }

    /// Applies one change to the loaded rows.
    ///
    /// Inserts are prepended, updates replace the row with the same id and
    /// deletes drop it. Returns whether the state changed.
    pub async fn apply_change(&self, event: &ChangeEvent) -> bool {
        if event.table != self.query.table() {
            return false;
        }

        let id_field = self.id_field.as_str();
        let changed = match event.kind {
            ChangeKind::Insert => {
                let Some(row) = event.new.clone() else {
                    return false;
                };
                self.query
                    .modify_state(|s| {
                        s.data.insert(0, row);
                        s.total_count += 1;
                        true
                    })
                    .await
            }
            ChangeKind::Update => {
                let Some(row) = event.new.clone() else {
                    return false;
                };
                let Some(id) = row.get(id_field).cloned() else {
                    return false;
                };
                self.query
                    .modify_state(|s| match find(&s.data, id_field, &id) {
                        Some(index) => {
                            s.data[index] = row;
                            true
                        }
                        None => false,
                    })
                    .await
            }
            ChangeKind::Delete => {
                let Some(id) = event
                    .old
                    .as_ref()
                    .and_then(|row| row.get(id_field))
                    .cloned()
                else {
                    return false;
                };
                self.query
                    .modify_state(|s| match find(&s.data, id_field, &id) {
                        Some(index) => {
                            s.data.remove(index);
                            s.total_count = s.total_count.saturating_sub(1);
                            true
                        }
                        None => false,
                    })
                    .await
            }
        };

        if changed {
            debug!("Applied {:?} on {}", event.kind, event.table);
        }
        changed
    }

    /// Applies every change already queued without waiting. Returns the
    /// number of changes that altered the state.
    pub async fn sync_pending(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.changes.try_recv() {
                Ok(event) => {
                    if self.apply_change(&event).await {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("Change feed lagged by {} events, refreshing", missed);
                    self.query.refresh().await;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return applied,
            }
        }
    }

    /// Waits for the next change and applies it. Returns None once the
    /// feed is closed.
    pub async fn next_change(&mut self) -> Option<ChangeKind> {
        loop {
            match self.changes.recv().await {
                Ok(event) => {
                    self.apply_change(&event).await;
                    return Some(event.kind);
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Change feed lagged by {} events, refreshing", missed);
                    self.query.refresh().await;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

fn find(rows: &[Value], id_field: &str, id: &Value) -> Option<usize> {
    rows.iter().position(|row| row.get(id_field) == Some(id))
}
