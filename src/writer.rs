//! # Chunked Bulk Writer
//!
//! This module writes row sets with as few statements as SQLite allows. A
//! changeset can carry tens of thousands of rows; inserting them one by one
//! costs a statement round trip each, while a single giant `INSERT` would
//! exceed SQLite's bound-parameter limit.
//!
//! ## Chunking
//!
//! Rows are split into chunks of
//! `min(max_rows_per_batch, max_statement_params / columns)` and each chunk
//! becomes one multi-row `INSERT`:
//!
//! ```text
//! rows:   [r0 r1 r2 r3 r4 r5 r6 r7 r8 r9]      columns = 4, params = 16
//!          └───chunk 0──┘└───chunk 1──┘└c2┘    rows per chunk = 4
//!
//! INSERT INTO t (a, b, c, d) VALUES (?, ?, ?, ?), (?, ?, ?, ?), ...
//! ```
//!
//! ## Id Alignment
//!
//! Entity rows need their generated id back, matched to the input row. The
//! writer never relies on the order SQLite hands rows back. Instead, each
//! chunk reserves a contiguous block of ids from `id_sequences` and inserts
//! them explicitly, so chunk `k` row `i` gets `first_k + i` by construction.
//! Chunk results are tagged with their chunk index and put back together by
//! [`reassemble`], which orders by that index and nothing else.
//!
//! ## Invariants
//!
//! - Output ids are in input order
//! - No statement binds more than `max_statement_params` values
//! - A failing chunk returns its error; earlier chunks are undone by the
//!   caller's transaction rollback

use std::ops::Range;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::types::{EntityId, EntityKind};

// =============================================================================
// Table Layouts
// =============================================================================

/// A row of bound values, in [`TableSpec::columns`] order.
pub type Row = Vec<Value>;

/// Name and column list of a table the writer inserts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

impl TableSpec {
    pub const fn new(name: &'static str, columns: &'static [&'static str]) -> Self {
        Self { name, columns }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// `INSERT INTO name (cols) VALUES (?, ...), (?, ...)` for `rows` rows.
    fn insert_sql(&self, rows: usize) -> String {
        let placeholders = vec!["?"; self.width()].join(", ");
        let tuple = format!("({})", placeholders);
        let values = vec![tuple.as_str(); rows].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.name,
            self.columns.join(", "),
            values
        )
    }
}

// =============================================================================
// Chunk Arithmetic
// =============================================================================

/// Rows per `INSERT` for a table `columns` wide. Never less than one.
pub fn rows_per_chunk(columns: usize, config: &EngineConfig) -> usize {
    let by_params = config.max_statement_params / columns.max(1);
    config.max_rows_per_batch.min(by_params).max(1)
}

/// Splits `0..total` into consecutive ranges of at most `per_chunk`.
pub fn chunk_ranges(total: usize, per_chunk: usize) -> Vec<Range<usize>> {
    let per_chunk = per_chunk.max(1);
    (0..total)
        .step_by(per_chunk)
        .map(|start| start..(start + per_chunk).min(total))
        .collect()
}

/// Ids produced by one chunk, tagged with the chunk's position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutput {
    pub index: usize,
    pub ids: Vec<EntityId>,
}

/// Concatenates chunk outputs in chunk-index order.
///
/// The order `outputs` arrive in is irrelevant.
pub fn reassemble(mut outputs: Vec<BatchOutput>) -> Vec<EntityId> {
    outputs.sort_by_key(|output| output.index);
    outputs.into_iter().flat_map(|output| output.ids).collect()
}

// =============================================================================
// Bulk Writer
// =============================================================================

/// Issues chunked inserts on a connection (normally an open transaction).
///
/// The writer never begins, commits or rolls back; it only runs statements
/// inside whatever transaction the caller holds.
pub struct BulkWriter<'a> {
    conn: &'a Connection,
    config: &'a EngineConfig,
}

impl<'a> BulkWriter<'a> {
    pub fn new(conn: &'a Connection, config: &'a EngineConfig) -> Self {
        Self { conn, config }
    }

    /// Inserts `rows` into `table`, returning the number of rows written.
    pub fn insert_rows(&self, table: &TableSpec, rows: &[Row]) -> Result<usize> {
        let per_chunk = rows_per_chunk(table.width(), self.config);
        let mut written = 0;

        for (index, range) in chunk_ranges(rows.len(), per_chunk).into_iter().enumerate() {
            let chunk = &rows[range];
            written += self.insert_chunk(table, chunk)?;
            debug!(table = table.name, chunk = index, rows = chunk.len(), "inserted chunk");
        }

        Ok(written)
    }

    /// Inserts entity rows, assigning each a fresh id of `kind`.
    ///
    /// `table.columns[0]` must be the id column; each row holds the remaining
    /// columns. Returns the assigned ids in input order.
    pub fn insert_with_ids(
        &self,
        kind: EntityKind,
        table: &TableSpec,
        rows: Vec<Row>,
    ) -> Result<Vec<EntityId>> {
        if table.columns.first() != Some(&"id") {
            return Err(Error::Schema(format!(
                "table {} has no leading id column",
                table.name
            )));
        }

        let per_chunk = rows_per_chunk(table.width(), self.config);
        let mut outputs = Vec::new();
        let mut rows = rows.into_iter();

        for (index, range) in chunk_ranges(rows.len(), per_chunk).into_iter().enumerate() {
            let count = range.len();
            let first = self.allocate_ids(kind, count)?;

            let ids: Vec<EntityId> = (0..count as i64)
                .map(|offset| EntityId::from_raw(first + offset))
                .collect();

            let chunk: Vec<Row> = ids
                .iter()
                .zip(rows.by_ref().take(count))
                .map(|(id, row)| {
                    let mut full = Vec::with_capacity(row.len() + 1);
                    full.push(Value::Integer(id.as_raw()));
                    full.extend(row);
                    full
                })
                .collect();

            self.insert_chunk(table, &chunk)?;
            debug!(
                table = table.name,
                chunk = index,
                rows = count,
                first_id = first,
                "inserted id chunk"
            );

            outputs.push(BatchOutput { index, ids });
        }

        Ok(reassemble(outputs))
    }

    /// Reserves `count` consecutive ids of `kind`, returning the first.
    pub fn allocate_ids(&self, kind: EntityKind, count: usize) -> Result<i64> {
        let name = kind.sequence_name();
        let first: i64 = self.conn.query_row(
            "SELECT next_id FROM id_sequences WHERE entity = ?1",
            params![name],
            |row| row.get(0),
        )?;

        self.conn.execute(
            "UPDATE id_sequences SET next_id = ?1 WHERE entity = ?2",
            params![first + count as i64, name],
        )?;

        Ok(first)
    }

    fn insert_chunk(&self, table: &TableSpec, chunk: &[Row]) -> Result<usize> {
        if chunk.is_empty() {
            return Ok(0);
        }
        if let Some(bad) = chunk.iter().find(|row| row.len() != table.width()) {
            return Err(Error::Schema(format!(
                "row for {} has {} values, expected {}",
                table.name,
                bad.len(),
                table.width()
            )));
        }

        let sql = table.insert_sql(chunk.len());
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let written = stmt.execute(params_from_iter(chunk.iter().flatten()))?;
        Ok(written)
    }
}

// =============================================================================
// Tests
// =============================================================================
