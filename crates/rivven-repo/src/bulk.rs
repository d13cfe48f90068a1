//! Bulk loader
//!
//! Loads an in-memory table into a destination table in batches through
//! [`Connection::bulk_insert`](crate::connection::Connection::bulk_insert),
//! which backends implement with their native bulk-copy protocol.
//!
//! - Empty input returns 0 without touching a connection
//! - Columns map by identical name unless a [`ColumnMapping`] is given
//! - Inside a [`UnitOfWork`](crate::context::UnitOfWork) the load joins the
//!   unit's transaction; otherwise it runs in its own transaction so a retried
//!   attempt never leaves partial batches behind

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Error, Result};
use crate::repository::SqlRepository;
use crate::security::{validate_qualified_name, validate_sql_identifier};
use crate::types::{Row, Value};

/// Default rows per batch
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default timeout for one bulk operation
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Source-to-destination column mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColumnMapping {
    /// Every source column goes to the destination column of the same name
    #[default]
    Identity,
    /// Only the listed `(source, destination)` pairs are loaded
    Explicit(Vec<(String, String)>),
}

impl ColumnMapping {
    /// Build an explicit mapping from `(source, destination)` pairs
    pub fn explicit<I, S, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: Into<String>,
    {
        Self::Explicit(
            pairs
                .into_iter()
                .map(|(s, d)| (s.into(), d.into()))
                .collect(),
        )
    }
}

/// Where and how to load
#[derive(Debug, Clone, PartialEq)]
pub struct BulkLoadSpec {
    /// Destination table, optionally schema-qualified
    pub table: String,
    /// Column mapping
    pub mapping: ColumnMapping,
    /// Rows per batch
    pub batch_size: usize,
    /// Timeout for the whole load
    pub timeout: Duration,
}

impl BulkLoadSpec {
    /// Load into `table` with identity mapping and default batching
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            mapping: ColumnMapping::Identity,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_BULK_TIMEOUT,
        }
    }

    /// Set the column mapping
    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Set rows per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the operation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A typed record that can be bulk loaded
pub trait BulkRecord {
    /// Column names, in the order [`BulkRecord::to_values`] produces values
    fn columns() -> Vec<String>;

    /// Values of this record
    fn to_values(&self) -> Vec<Value>;
}

/// Column-major header plus row-major values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularData {
    /// Column names
    pub columns: Vec<String>,
    /// Rows, each with one value per column
    pub rows: Vec<Vec<Value>>,
}

impl TabularData {
    /// Create tabular data
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Collect typed records
    pub fn from_records<R: BulkRecord>(records: &[R]) -> Self {
        Self {
            columns: R::columns(),
            rows: records.iter().map(BulkRecord::to_values).collect(),
        }
    }

    /// Reuse rows read from another query
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|r| r.columns().to_vec())
            .unwrap_or_default();
        Self {
            columns,
            rows: rows.into_iter().map(|r| r.values().to_vec()).collect(),
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Apply `mapping`, returning destination columns and projected rows
    pub fn project(&self, mapping: &ColumnMapping) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let (destinations, indices): (Vec<String>, Vec<usize>) = match mapping {
            ColumnMapping::Identity => self
                .columns
                .iter()
                .cloned()
                .enumerate()
                .map(|(i, c)| (c, i))
                .unzip(),
            ColumnMapping::Explicit(pairs) => {
                if pairs.is_empty() {
                    return Err(Error::validation("column_mapping", "mapping is empty"));
                }
                let mut destinations = Vec::with_capacity(pairs.len());
                let mut indices = Vec::with_capacity(pairs.len());
                for (source, destination) in pairs {
                    let index = self
                        .columns
                        .iter()
                        .position(|c| c.eq_ignore_ascii_case(source))
                        .ok_or_else(|| {
                            Error::validation(
                                "column_mapping",
                                format!("source column '{source}' not found"),
                            )
                        })?;
                    destinations.push(destination.clone());
                    indices.push(index);
                }
                (destinations, indices)
            }
        };

        if destinations.is_empty() {
            return Err(Error::validation("columns", "bulk load needs at least one column"));
        }
        for column in &destinations {
            validate_sql_identifier(column)?;
        }

        let width = self.columns.len();
        let rows = self
            .rows
            .iter()
            .enumerate()
            .map(|(n, row)| {
                if row.len() != width {
                    return Err(Error::validation(
                        "rows",
                        format!("row {n} has {} values, expected {width}", row.len()),
                    ));
                }
                Ok(indices.iter().map(|&i| row[i].clone()).collect())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((destinations, rows))
    }
}

struct BulkPayload {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    batch_size: usize,
    own_transaction: bool,
}

impl SqlRepository {
    /// Bulk-load defaults of this repository for `table`
    pub fn bulk_spec(&self, table: impl Into<String>) -> BulkLoadSpec {
        BulkLoadSpec::new(table)
            .with_batch_size(self.options().bulk_batch_size)
            .with_timeout(self.options().bulk_timeout)
    }

    /// Load `data` into `spec.table`, returning rows written
    pub async fn bulk_insert(
        &self,
        data: &TabularData,
        spec: &BulkLoadSpec,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if data.is_empty() {
            return Ok(0);
        }

        validate_qualified_name(&spec.table)?;
        if spec.batch_size == 0 {
            return Err(Error::validation("batch_size", "must be at least 1"));
        }
        let (columns, rows) = data.project(&spec.mapping)?;

        let payload = BulkPayload {
            table: spec.table.clone(),
            columns,
            rows,
            batch_size: spec.batch_size,
            own_transaction: self.unit_of_work().is_none(),
        };
        let log_sql = format!("BULK INSERT {}", spec.table);

        let written = self
            .run(
                "bulk_insert",
                &log_sql,
                spec.timeout,
                cancel,
                &payload,
                |conn, p| {
                    Box::pin(async move {
                        let tx = if p.own_transaction {
                            Some(conn.begin().await?)
                        } else {
                            None
                        };

                        let mut written = 0u64;
                        for batch in p.rows.chunks(p.batch_size) {
                            match conn.bulk_insert(&p.table, &p.columns, batch).await {
                                Ok(n) => written += n,
                                Err(e) => {
                                    if let Some(tx) = tx {
                                        let _ = tx.rollback().await;
                                    }
                                    return Err(e);
                                }
                            }
                        }

                        if let Some(tx) = tx {
                            tx.commit().await?;
                        }
                        Ok(written)
                    })
                },
            )
            .await?;

        info!(
            table = %spec.table,
            rows = written,
            batches = payload.rows.len().div_ceil(payload.batch_size),
            "Bulk load completed"
        );
        Ok(written)
    }

    /// Load typed records into `spec.table`
    pub async fn bulk_insert_records<R: BulkRecord>(
        &self,
        records: &[R],
        spec: &BulkLoadSpec,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        self.bulk_insert(&TabularData::from_records(records), spec, cancel)
            .await
    }
}
