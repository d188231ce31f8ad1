//! Grid construction for commit, read, and history-write requests.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use super::value::{Ref, Value, ZonedDateTime, format_number, quote};
use crate::error::ClientError;

/// Grid format version written in every meta line.
pub const ZINC_VERSION: &str = "3.0";

/// Format literal handed to `parseDateTime` in history-write expressions.
pub const HIS_WRITE_TS_FORMAT: &str = "YYYY-MM-DDThh:mm:ssz";

/// Commit operation named in the grid meta line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOp {
    /// Create new records.
    Add,
    /// Overwrite tags on existing records.
    Update,
    /// Delete records.
    Remove,
}

impl CommitOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

/// A record written as one row of a commit grid.
pub trait CommitRecord {
    /// Server identifier, if assigned.
    fn record_id(&self) -> Option<&Ref>;

    /// Columns every record of this kind carries, even when empty.
    fn required_columns(&self) -> &'static [&'static str];

    /// Tags as written on the wire, including `id` when assigned.
    fn wire_tags(&self) -> BTreeMap<String, Value>;

    /// Short description used in validation errors.
    fn label(&self) -> String;
}

/// A timestamped reading written through a `hisWrite` expression.
pub trait HisWriteRecord {
    /// Point the reading belongs to.
    fn point(&self) -> &Ref;

    /// Reading time.
    fn sampled_at(&self) -> &ZonedDateTime;

    /// Reading value; numbers, booleans, and text are the usual kinds.
    fn reading(&self) -> Value;
}

/// An immutable Zinc grid: meta line, column header, and data rows.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    meta: Vec<(&'static str, Value)>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Grid {
    fn new(meta: Vec<(&'static str, Value)>, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { meta, columns, rows }
    }

    /// Column names in header order.
    #[must_use]
    pub fn columns(&self) -> &[String] { &self.columns }

    /// Data rows, one value per column.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] { &self.rows }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize { self.rows.len() }

    /// Whether the grid has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    /// Render the grid as Zinc text.
    #[must_use]
    pub fn to_zinc(&self) -> String { self.to_string() }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ver:{}", quote(ZINC_VERSION))?;
        for (name, value) in &self.meta {
            write!(f, " {name}:{}", value.encode())?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.columns.join(", "))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(Value::encode).collect();
            writeln!(f, "{}", cells.join(", "))?;
        }
        Ok(())
    }
}

/// Whether `name` is a legal Haystack tag name.
///
/// Tag names are written unquoted in the header line, so anything outside
/// `[a-z][A-Za-z0-9_]*` is rejected.
#[must_use]
pub fn is_tag_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn commit_meta(op: CommitOp) -> Vec<(&'static str, Value)> {
    vec![("commit", Value::Str(op.as_str().to_owned()))]
}

fn record_grid<R: CommitRecord>(op: CommitOp, records: &[R]) -> Result<Grid, ClientError> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    for record in records {
        names.extend(record.required_columns().iter().map(|t| (*t).to_owned()));
        names.extend(record.wire_tags().into_keys());
    }
    match op {
        CommitOp::Update => {
            names.insert("id".to_owned());
        }
        _ => {
            names.remove("id");
        }
    }
    if let Some(bad) = names.iter().find(|n| !is_tag_name(n)) {
        return Err(ClientError::validation(format!("invalid tag name {bad:?}")));
    }
    let columns: Vec<String> = names.into_iter().collect();
    let rows = records
        .iter()
        .map(|record| {
            let mut tags = record.wire_tags();
            columns
                .iter()
                .map(|col| tags.remove(col).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Ok(Grid::new(commit_meta(op), columns, rows))
}

/// Encode a `commit:"add"` grid.
///
/// The header is the union of each kind's required tags and every tag
/// present on any record, minus `id`, sorted lexicographically.
///
/// # Errors
///
/// Returns [`ClientError::Validation`] if a tag name is not a legal
/// Haystack name.
pub fn encode_commit_add<R: CommitRecord>(records: &[R]) -> Result<Grid, ClientError> {
    record_grid(CommitOp::Add, records)
}

/// Encode a `commit:"update"` grid; the `id` column is retained.
///
/// # Errors
///
/// Returns [`ClientError::Validation`] before building anything if any record
/// lacks an identifier, or if a tag name is not a legal Haystack name.
pub fn encode_commit_update<R: CommitRecord>(records: &[R]) -> Result<Grid, ClientError> {
    if let Some(missing) = records.iter().find(|r| r.record_id().is_none()) {
        return Err(ClientError::validation(format!(
            "{} must have an id for update operations",
            missing.label()
        )));
    }
    record_grid(CommitOp::Update, records)
}

/// Encode a `commit:"remove"` grid.
///
/// The `mod` column is emitted when any entry carries a modification
/// timestamp, which the server uses for optimistic locking.
#[must_use]
pub fn encode_commit_remove(entries: &[(Ref, Option<ZonedDateTime>)]) -> Grid {
    let with_mod = entries.iter().any(|(_, m)| m.is_some());
    let mut columns = vec!["id".to_owned()];
    if with_mod {
        columns.push("mod".to_owned());
    }
    let rows = entries
        .iter()
        .map(|(id, modified)| {
            let mut row = vec![Value::Ref(id.clone())];
            if with_mod {
                row.push(modified.clone().map_or(Value::Null, Value::DateTime));
            }
            row
        })
        .collect();
    Grid::new(commit_meta(CommitOp::Remove), columns, rows)
}

/// Encode a read-by-filter grid with a single quoted `filter` cell.
#[must_use]
pub fn encode_read_by_filter(filter: &str) -> Grid {
    Grid::new(
        Vec::new(),
        vec!["filter".to_owned()],
        vec![vec![Value::Str(filter.to_owned())]],
    )
}

fn axon_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::Str(s) => quote(s),
        Value::Marker | Value::Ref(_) | Value::DateTime(_) => value.encode(),
    }
}

/// The `hisWrite` call written for one reading.
#[must_use]
pub fn his_write_expr<R: HisWriteRecord>(record: &R) -> String {
    let ts = record.sampled_at();
    format!(
        "hisWrite({{ts: parseDateTime({}, {}, {}), val: {}}}, {})",
        quote(&ts.to_iso_seconds()),
        quote(HIS_WRITE_TS_FORMAT),
        quote(ts.zone()),
        axon_literal(&record.reading()),
        record.point(),
    )
}

/// Encode readings as an `expr` grid for the `evalAll` RPC, one
/// `hisWrite` expression per reading.
#[must_use]
pub fn encode_his_write_rpc<R: HisWriteRecord>(records: &[R]) -> Grid {
    let rows = records
        .iter()
        .map(|r| vec![Value::Str(his_write_expr(r))])
        .collect();
    Grid::new(Vec::new(), vec!["expr".to_owned()], rows)
}
