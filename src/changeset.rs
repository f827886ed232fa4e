//! # Changeset Rows
//!
//! A changeset is the edit session every entity version belongs to. The
//! engine opens them for tests and the CLI, checks they exist before
//! applying, and folds each applied document into the row: the bounding box
//! widens to cover every touched coordinate and the change counter grows by
//! the number of affected entities.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::{current_time_ms, BoundingBox, ChangesetId};

/// Current state of a changeset row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangesetSummary {
    pub id: ChangesetId,
    pub user_id: i64,
    pub created_at_ms: u64,
    pub closed_at_ms: u64,
    /// `None` until a changeset touching a point is applied.
    #[serde(flatten)]
    pub bbox: Option<BoundingBox>,
    pub num_changes: u64,
}

const SELECT_CHANGESET: &str = "SELECT id, user_id, created_at, closed_at, \
     min_lat, max_lat, min_lon, max_lon, num_changes \
     FROM changesets WHERE id = ?1";

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ChangesetSummary> {
    let min_lat: Option<i32> = row.get(4)?;
    let max_lat: Option<i32> = row.get(5)?;
    let min_lon: Option<i32> = row.get(6)?;
    let max_lon: Option<i32> = row.get(7)?;

    let bbox = match (min_lat, max_lat, min_lon, max_lon) {
        (Some(min_lat), Some(max_lat), Some(min_lon), Some(max_lon)) => Some(BoundingBox {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }),
        _ => None,
    };

    Ok(ChangesetSummary {
        id: ChangesetId::from_raw(row.get(0)?),
        user_id: row.get(1)?,
        created_at_ms: row.get::<_, i64>(2)? as u64,
        closed_at_ms: row.get::<_, i64>(3)? as u64,
        bbox,
        num_changes: row.get::<_, i64>(8)? as u64,
    })
}

/// Creates an empty changeset for `user_id`.
///
/// The row starts closed at its creation time; applying a document moves
/// `closed_at` forward.
pub fn open_changeset(conn: &Connection, user_id: i64) -> Result<ChangesetSummary> {
    let now = current_time_ms() as i64;
    conn.execute(
        "INSERT INTO changesets (user_id, created_at, closed_at, num_changes) VALUES (?1, ?2, ?2, 0)",
        params![user_id, now],
    )?;
    load_changeset(conn, ChangesetId::from_raw(conn.last_insert_rowid()))
}

/// Reads a changeset summary.
///
/// # Errors
///
/// `Error::ChangesetNotFound` if there is no such row.
pub fn load_changeset(conn: &Connection, id: ChangesetId) -> Result<ChangesetSummary> {
    conn.query_row(SELECT_CHANGESET, params![id.as_raw()], summary_from_row)
        .optional()?
        .ok_or(Error::ChangesetNotFound { id })
}

/// Folds an applied document into the changeset row.
///
/// `bbox` covers the coordinates the document touched and is unioned with
/// the stored box, so the stored box never shrinks. `changes` is added to
/// `num_changes` and `closed_at` is set to `now_ms`.
pub fn record_changes(
    conn: &Connection,
    id: ChangesetId,
    bbox: Option<BoundingBox>,
    changes: u64,
    now_ms: u64,
) -> Result<ChangesetSummary> {
    let current = load_changeset(conn, id)?;

    let widened = match (current.bbox, bbox) {
        (Some(stored), Some(touched)) => Some(stored.union(&touched)),
        (stored, touched) => stored.or(touched),
    };

    let (min_lat, max_lat, min_lon, max_lon) = match widened {
        Some(b) => (Some(b.min_lat), Some(b.max_lat), Some(b.min_lon), Some(b.max_lon)),
        None => (None, None, None, None),
    };

    conn.execute(
        "UPDATE changesets SET min_lat = ?1, max_lat = ?2, min_lon = ?3, max_lon = ?4, \
         num_changes = num_changes + ?5, closed_at = ?6 WHERE id = ?7",
        params![
            min_lat,
            max_lat,
            min_lon,
            max_lon,
            changes as i64,
            now_ms as i64,
            id.as_raw()
        ],
    )?;

    load_changeset(conn, id)
}
