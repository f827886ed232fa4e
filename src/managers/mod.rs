//! # Entity Managers
//!
//! One manager per entity kind turns decoded records into rows. All three
//! follow the same contract ([`EntityManager`]) and share the helpers in this
//! module; they differ only in their column layouts and nested references.
//!
//! ## Lifecycle of an Entity
//!
//! ```text
//!            create                modify*                  delete
//!  absent ──────────► visible v1 ──────────► visible vN+1 ──────────► invisible vN+1
//!                                                                     (terminal, row kept)
//! ```
//!
//! Every transition writes the new state to the `current_*` tables and
//! appends the same state to the history tables under its version.
//!
//! ## Transaction Ownership
//!
//! Managers run statements on the connection they are handed, which is
//! always inside the coordinator's transaction. They never begin, commit or
//! roll back. Any error they return aborts the whole changeset.

pub mod grouping;
pub mod line;
pub mod point;

use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::codec::{ElementMeta, GroupingRecord, LineRecord, PointRecord};
use crate::config::{EngineConfig, VersionPolicy};
use crate::error::{Error, Result};
use crate::remap::IdRemap;
use crate::types::{Action, ChangesetId, EntityId, EntityKind, EntityRef, Tag, Version};
use crate::writer::{BulkWriter, Row, TableSpec};

pub use grouping::GroupingManager;
pub use line::LineManager;
pub use point::PointManager;

// =============================================================================
// Manager Contract
// =============================================================================

/// Per-apply values every manager needs.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext<'a> {
    /// The session changeset.
    pub changeset: ChangesetId,
    /// Timestamp written to every row touched by this apply.
    pub now_ms: u64,
    pub config: &'a EngineConfig,
}

impl<'a> ApplyContext<'a> {
    /// Changeset a created or modified row belongs to: the declared one, or
    /// the session's.
    pub fn owner(&self, meta: &ElementMeta) -> ChangesetId {
        meta.changeset.unwrap_or(self.changeset)
    }

    pub fn writer<'c>(&self, conn: &'c Connection) -> BulkWriter<'c>
    where
        'a: 'c,
    {
        BulkWriter::new(conn, self.config)
    }
}

/// Create, modify and delete for one entity kind.
///
/// Each method returns the affected server ids in input order.
pub trait EntityManager {
    type Record: HasMeta;

    /// Inserts new entities at version 1 and records their placeholders.
    fn create(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
        records: &[Self::Record],
        remap: &mut IdRemap,
    ) -> Result<Vec<EntityId>>;

    /// Replaces the state of existing entities, including all tags and
    /// nested references. The result is always visible; hiding an entity
    /// goes through [`EntityManager::delete`].
    fn modify(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
        records: &[Self::Record],
        remap: &IdRemap,
    ) -> Result<Vec<EntityId>>;

    /// Soft-deletes existing entities.
    fn delete(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
        records: &[Self::Record],
    ) -> Result<Vec<EntityId>> {
        soft_delete(conn, ctx, self.tables(), records)
    }

    /// Table layout of this kind.
    fn tables(&self) -> &'static Tables;
}

/// Access to the attributes shared by every record type.
pub trait HasMeta {
    fn meta(&self) -> &ElementMeta;
}

impl HasMeta for PointRecord {
    fn meta(&self) -> &ElementMeta {
        &self.meta
    }
}

impl HasMeta for LineRecord {
    fn meta(&self) -> &ElementMeta {
        &self.meta
    }
}

impl HasMeta for GroupingRecord {
    fn meta(&self) -> &ElementMeta {
        &self.meta
    }
}

// =============================================================================
// Table Layouts
// =============================================================================

/// Every table one entity kind writes.
#[derive(Debug)]
pub struct Tables {
    pub kind: EntityKind,
    /// Current state, leading `id` column.
    pub current: TableSpec,
    /// Version history, keyed by (owner id, version).
    pub history: TableSpec,
    /// Columns of `current` matching `history.columns`, for snapshots.
    pub snapshot_select: &'static str,
    pub current_tags: TableSpec,
    pub history_tags: TableSpec,
    /// Ordered nested references (way nodes, relation members).
    pub current_refs: Option<TableSpec>,
    pub history_refs: Option<TableSpec>,
}

impl Tables {
    /// Tables with rows owned by an entity id, in deletion order.
    fn dependents(&self) -> impl Iterator<Item = &TableSpec> {
        std::iter::once(&self.current_tags).chain(self.current_refs.iter())
    }
}

// =============================================================================
// Stored State and Versioning
// =============================================================================

/// The part of a current row that decides whether an edit is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredState {
    pub version: Version,
    pub visible: bool,
}

/// One planned transition of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    /// Position of the record in the input batch.
    pub index: usize,
    pub id: EntityId,
    pub version: Version,
}

/// Version an edit produces from the stored one.
///
/// # Errors
///
/// `Error::StaleVersion` under [`VersionPolicy::Strict`] when the declared
/// version is not the stored one. An undeclared version is accepted.
/// `Error::DocumentParse` when the base is already [`Version::MAX`].
pub fn next_version(
    kind: EntityKind,
    id: EntityId,
    declared: Option<Version>,
    stored: Version,
    policy: VersionPolicy,
) -> Result<Version> {
    let base = match policy {
        VersionPolicy::Trust => declared.map_or(stored, |d| d.max(stored)),
        VersionPolicy::Strict => match declared {
            Some(declared) if declared != stored => {
                return Err(Error::StaleVersion {
                    kind,
                    id,
                    declared,
                    stored,
                })
            }
            _ => stored,
        },
    };
    base.next().ok_or_else(|| {
        Error::parse(format!("{} {}: version {} cannot be incremented", kind, id, base))
    })
}

/// Server id of a modify/delete target.
pub(crate) fn existing_id(reference: EntityRef) -> Result<EntityId> {
    match reference {
        EntityRef::Existing(id) => Ok(id),
        EntityRef::Placeholder(n) => Err(Error::parse(format!(
            "placeholder id {} is only valid in create",
            n
        ))),
    }
}

/// `?, ?, ?` with `n` markers.
pub(crate) fn markers(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Loads version and visibility of every id present in `table`.
pub fn load_states(
    conn: &Connection,
    table: &str,
    ids: &[EntityId],
    config: &EngineConfig,
) -> Result<HashMap<EntityId, StoredState>> {
    let mut unique: Vec<i64> = ids.iter().map(|id| id.as_raw()).collect();
    unique.sort_unstable();
    unique.dedup();

    let mut states = HashMap::with_capacity(unique.len());
    for chunk in unique.chunks(config.max_statement_params) {
        let sql = format!(
            "SELECT id, version, visible FROM {} WHERE id IN ({})",
            table,
            markers(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?;

        for row in rows {
            let (id, version, visible) = row?;
            states.insert(
                EntityId::from_raw_unchecked(id),
                StoredState {
                    version: Version::from_raw(version as u64),
                    visible,
                },
            );
        }
    }
    Ok(states)
}

/// Checks every record against storage and assigns its new version.
///
/// Records are planned in input order against a running view of state, so
/// an id edited twice in one batch gets two consecutive versions and a
/// second delete of the same id fails as already deleted.
pub fn plan_revisions<R: HasMeta>(
    conn: &Connection,
    ctx: &ApplyContext<'_>,
    tables: &Tables,
    records: &[R],
    action: Action,
) -> Result<Vec<Revision>> {
    let kind = tables.kind;
    let ids = records
        .iter()
        .map(|r| existing_id(r.meta().id))
        .collect::<Result<Vec<_>>>()?;

    let mut states = load_states(conn, tables.current.name, &ids, ctx.config)?;
    let mut revisions = Vec::with_capacity(records.len());

    for (index, (record, id)) in records.iter().zip(ids).enumerate() {
        let state = states
            .get(&id)
            .copied()
            .ok_or(Error::EntityNotFound { kind, id })?;
        if !state.visible {
            return Err(Error::EntityDeleted { kind, id });
        }

        let meta = record.meta();
        let version = next_version(kind, id, meta.version, state.version, ctx.config.version_policy)?;
        let visible = action != Action::Delete;
        states.insert(id, StoredState { version, visible });

        revisions.push(Revision { index, id, version });
    }
    Ok(revisions)
}

/// Revisions that hold the final state of their id (the last one per id).
pub fn final_revisions(revisions: &[Revision]) -> Vec<Revision> {
    let mut last: HashMap<EntityId, usize> = HashMap::new();
    for (position, revision) in revisions.iter().enumerate() {
        last.insert(revision.id, position);
    }
    revisions
        .iter()
        .enumerate()
        .filter(|(position, revision)| last.get(&revision.id) == Some(position))
        .map(|(_, revision)| *revision)
        .collect()
}

// =============================================================================
// Row Helpers
// =============================================================================

pub(crate) fn current_tag_rows(id: EntityId, tags: &[Tag]) -> impl Iterator<Item = Row> + '_ {
    tags.iter().map(move |tag| {
        vec![
            Value::Integer(id.as_raw()),
            Value::Text(tag.key.clone()),
            Value::Text(tag.value.clone()),
        ]
    })
}

pub(crate) fn history_tag_rows(
    id: EntityId,
    version: Version,
    tags: &[Tag],
) -> impl Iterator<Item = Row> + '_ {
    tags.iter().map(move |tag| {
        vec![
            Value::Integer(id.as_raw()),
            Value::Integer(version.as_raw() as i64),
            Value::Text(tag.key.clone()),
            Value::Text(tag.value.clone()),
        ]
    })
}

/// Removes every row in `table` owned by one of `ids` (first column).
pub fn delete_owned(
    conn: &Connection,
    table: &TableSpec,
    ids: &[EntityId],
    config: &EngineConfig,
) -> Result<usize> {
    let owner = table.columns[0];
    let raw: Vec<i64> = ids.iter().map(|id| id.as_raw()).collect();
    let mut removed = 0;

    for chunk in raw.chunks(config.max_statement_params) {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            table.name,
            owner,
            markers(chunk.len())
        );
        removed += conn.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    Ok(removed)
}

/// Removes all tags and nested references of `ids`.
pub fn strip_dependents(
    conn: &Connection,
    tables: &Tables,
    ids: &[EntityId],
    config: &EngineConfig,
) -> Result<()> {
    for table in tables.dependents() {
        delete_owned(conn, table, ids, config)?;
    }
    Ok(())
}

/// Copies the current rows of `ids` into the history table.
pub fn snapshot_history(
    conn: &Connection,
    tables: &Tables,
    ids: &[EntityId],
    config: &EngineConfig,
) -> Result<usize> {
    let raw: Vec<i64> = ids.iter().map(|id| id.as_raw()).collect();
    let mut copied = 0;

    for chunk in raw.chunks(config.max_statement_params) {
        let sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} WHERE id IN ({})",
            tables.history.name,
            tables.history.columns.join(", "),
            tables.snapshot_select,
            tables.current.name,
            markers(chunk.len())
        );
        copied += conn.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    Ok(copied)
}

/// The delete operation, identical for every kind.
///
/// Marks each target invisible at its next version under the session
/// changeset, removes its tags and references, and appends the tombstone to
/// history. Current rows are never removed.
pub fn soft_delete<R: HasMeta>(
    conn: &Connection,
    ctx: &ApplyContext<'_>,
    tables: &Tables,
    records: &[R],
) -> Result<Vec<EntityId>> {
    let revisions = plan_revisions(conn, ctx, tables, records, Action::Delete)?;

    let sql = format!(
        "UPDATE {} SET visible = 0, version = ?1, changeset_id = ?2, timestamp = ?3 WHERE id = ?4",
        tables.current.name
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    for revision in &revisions {
        stmt.execute(params![
            revision.version.as_raw() as i64,
            ctx.changeset.as_raw(),
            ctx.now_ms as i64,
            revision.id.as_raw()
        ])?;
    }

    let ids: Vec<EntityId> = revisions.iter().map(|r| r.id).collect();
    strip_dependents(conn, tables, &ids, ctx.config)?;
    snapshot_history(conn, tables, &ids, ctx.config)?;

    tracing::debug!(kind = %tables.kind, count = ids.len(), "soft-deleted entities");
    Ok(ids)
}
