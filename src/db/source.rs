//! Remote data source seam.
//!
//! Requests are plain data; implementors translate them to whatever the
//! backing store speaks. Rows are JSON objects.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row filter used for free-text search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Case-insensitive LIKE (`%` any run, `_` one character)
    ILike { column: String, pattern: String },
    Or(Vec<Condition>),
}

impl Condition {
    pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Condition::ILike {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    /// OR of `%term%` across `columns`
    pub fn search(columns: &[String], term: &str) -> Self {
        Condition::Or(
            columns
                .iter()
                .map(|column| Condition::ilike(column.clone(), format!("%{}%", term)))
                .collect(),
        )
    }

    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Condition::ILike { column, pattern } => match row.get(column) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => like_match(&s.to_lowercase(), &pattern.to_lowercase()),
                Some(other) => like_match(&other.to_string().to_lowercase(), &pattern.to_lowercase()),
            },
            Condition::Or(conditions) => conditions.iter().any(|c| c.matches(row)),
        }
    }
}

fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // Greedy wildcard match with backtracking to the last `%`
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub ascending: bool,
}

impl SortSpec {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// Orders two rows by this column; nulls sort last
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = compare_values(a.get(&self.column), b.get(&self.column));
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Embeds rows of `table` whose `foreign_key` equals the row's `local_key`
/// under `alias`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinClause {
    pub table: String,
    pub local_key: String,
    pub foreign_key: String,
    pub alias: String,
}

impl JoinClause {
    pub fn new(
        table: impl Into<String>,
        local_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let table = table.into();
        Self {
            alias: table.clone(),
            table,
            local_key: local_key.into(),
            foreign_key: foreign_key.into(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }
}

/// A select with exact count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectRequest {
    pub table: String,
    /// Comma-separated columns or `*`
    pub select: String,
    /// Equality filters
    pub filters: BTreeMap<String, Value>,
    pub search: Option<Condition>,
    pub sort: Option<SortSpec>,
    /// Inclusive row range
    pub range: Option<(usize, usize)>,
    pub joins: Vec<JoinClause>,
}

impl SelectRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: "*".to_string(),
            filters: BTreeMap::new(),
            search: None,
            sort: None,
            range: None,
            joins: Vec::new(),
        }
    }

    /// Whether a row passes the filters and the search condition
    pub fn matches(&self, row: &Value) -> bool {
        self.filters
            .iter()
            .all(|(column, expected)| row.get(column) == Some(expected))
            && self.search.as_ref().map_or(true, |c| c.matches(row))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectResponse {
    pub data: Vec<Value>,
    /// Rows matching before the range was applied
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }

    /// Whether the aggregation reads a column's values
    pub fn needs_column(&self) -> bool {
        !matches!(self, Aggregation::Count)
    }

    /// Folds numeric column values. Count counts all rows; avg, min and
    /// max yield null for an empty input.
    pub fn apply(&self, rows: usize, values: &[f64]) -> Value {
        match self {
            Aggregation::Count => Value::from(rows),
            Aggregation::Sum => Value::from(values.iter().sum::<f64>()),
            Aggregation::Avg if values.is_empty() => Value::Null,
            Aggregation::Avg => Value::from(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Min => values
                .iter()
                .copied()
                .reduce(f64::min)
                .map_or(Value::Null, Value::from),
            Aggregation::Max => values
                .iter()
                .copied()
                .reduce(f64::max)
                .map_or(Value::Null, Value::from),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRequest {
    pub table: String,
    pub aggregation: Aggregation,
    pub column: String,
    pub filters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change pushed by the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

/// Remote table access
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn select(&self, request: &SelectRequest) -> Result<SelectResponse>;

    async fn aggregate(&self, request: &AggregateRequest) -> Result<Value>;

    /// Inserts rows and returns them as stored
    async fn insert(&self, table: &str, records: &[Value]) -> Result<Vec<Value>>;

    /// Updates rows matched by `id_field` and returns them as stored
    async fn update(&self, table: &str, records: &[Value], id_field: &str) -> Result<Vec<Value>>;

    fn source_name(&self) -> &str;
}
