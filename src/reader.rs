//! # Current-State Reader
//!
//! Read-back of committed entities: the CLI prints them, the async API
//! serves them, and tests use them to check what a changeset left behind.
//!
//! All functions take a plain `&Connection`. Under WAL a reader sees the
//! last committed state, never a changeset that is still being applied.

use std::collections::BTreeMap;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::managers::markers;
use crate::schema::ENTITY_TABLES;
use crate::types::{ChangesetId, Coordinate, EntityId, EntityKind, Tag, Version};

// =============================================================================
// Entity States
// =============================================================================

/// Columns every current row carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowMeta {
    pub id: EntityId,
    pub version: Version,
    pub changeset: ChangesetId,
    pub visible: bool,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointState {
    #[serde(flatten)]
    pub meta: RowMeta,
    pub coordinate: Coordinate,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineState {
    #[serde(flatten)]
    pub meta: RowMeta,
    /// Point ids in sequence order.
    pub nodes: Vec<EntityId>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMember {
    pub kind: EntityKind,
    pub id: EntityId,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupingState {
    #[serde(flatten)]
    pub meta: RowMeta,
    /// Members in sequence order.
    pub members: Vec<StoredMember>,
    pub tags: Vec<Tag>,
}

/// Current state of any entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum EntityState {
    #[serde(rename = "node")]
    Point(PointState),
    #[serde(rename = "way")]
    Line(LineState),
    #[serde(rename = "relation")]
    Grouping(GroupingState),
}

impl EntityState {
    pub fn meta(&self) -> &RowMeta {
        match self {
            EntityState::Point(p) => &p.meta,
            EntityState::Line(l) => &l.meta,
            EntityState::Grouping(g) => &g.meta,
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

fn load_meta(conn: &Connection, table: &str, id: EntityId) -> Result<Option<RowMeta>> {
    let sql = format!(
        "SELECT id, version, changeset_id, visible, timestamp FROM {} WHERE id = ?1",
        table
    );
    let meta = conn
        .query_row(&sql, params![id.as_raw()], |row| {
            Ok(RowMeta {
                id: EntityId::from_raw_unchecked(row.get(0)?),
                version: Version::from_raw(row.get::<_, i64>(1)? as u64),
                changeset: ChangesetId::from_raw(row.get(2)?),
                visible: row.get(3)?,
                timestamp_ms: row.get::<_, i64>(4)? as u64,
            })
        })
        .optional()?;
    Ok(meta)
}

fn load_tags(conn: &Connection, table: &str, owner: &str, id: EntityId) -> Result<Vec<Tag>> {
    let sql = format!("SELECT k, v FROM {} WHERE {} = ?1 ORDER BY k", table, owner);
    let mut stmt = conn.prepare(&sql)?;
    let tags = stmt
        .query_map(params![id.as_raw()], |row| Ok(Tag::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tags)
}

/// Loads a point, or `None` if the id was never created.
pub fn load_point(conn: &Connection, id: EntityId) -> Result<Option<PointState>> {
    let Some(meta) = load_meta(conn, "current_nodes", id)? else {
        return Ok(None);
    };
    let coordinate = conn.query_row(
        "SELECT latitude, longitude FROM current_nodes WHERE id = ?1",
        params![id.as_raw()],
        |row| Ok(Coordinate::from_fixed(row.get(0)?, row.get(1)?)),
    )?;
    let tags = load_tags(conn, "current_node_tags", "node_id", id)?;
    Ok(Some(PointState {
        meta,
        coordinate,
        tags,
    }))
}

/// Loads a line with its point references in sequence order.
pub fn load_line(conn: &Connection, id: EntityId) -> Result<Option<LineState>> {
    let Some(meta) = load_meta(conn, "current_ways", id)? else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT node_id FROM current_way_nodes WHERE way_id = ?1 ORDER BY sequence_id",
    )?;
    let nodes = stmt
        .query_map(params![id.as_raw()], |row| {
            Ok(EntityId::from_raw_unchecked(row.get(0)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let tags = load_tags(conn, "current_way_tags", "way_id", id)?;
    Ok(Some(LineState { meta, nodes, tags }))
}

/// Loads a grouping with its members in sequence order.
pub fn load_grouping(conn: &Connection, id: EntityId) -> Result<Option<GroupingState>> {
    let Some(meta) = load_meta(conn, "current_relations", id)? else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT member_type, member_id, member_role FROM current_relation_members \
         WHERE relation_id = ?1 ORDER BY sequence_id",
    )?;
    let rows = stmt
        .query_map(params![id.as_raw()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let members = rows
        .into_iter()
        .map(|(member_type, member_id, role)| {
            let kind = EntityKind::from_member_type(&member_type).ok_or_else(|| {
                Error::Integrity {
                    message: format!("relation {} has member type '{}'", id, member_type),
                }
            })?;
            Ok(StoredMember {
                kind,
                id: EntityId::from_raw_unchecked(member_id),
                role,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let tags = load_tags(conn, "current_relation_tags", "relation_id", id)?;
    Ok(Some(GroupingState {
        meta,
        members,
        tags,
    }))
}

/// Loads any entity by kind.
pub fn load_entity(conn: &Connection, kind: EntityKind, id: EntityId) -> Result<Option<EntityState>> {
    Ok(match kind {
        EntityKind::Point => load_point(conn, id)?.map(EntityState::Point),
        EntityKind::Line => load_line(conn, id)?.map(EntityState::Line),
        EntityKind::Grouping => load_grouping(conn, id)?.map(EntityState::Grouping),
    })
}

/// Stored coordinates of the given points, in no particular order.
///
/// Ids with no row are skipped.
pub fn point_coordinates(
    conn: &Connection,
    ids: &[EntityId],
    config: &EngineConfig,
) -> Result<Vec<Coordinate>> {
    let raw: Vec<i64> = ids.iter().map(|id| id.as_raw()).collect();
    let mut coords = Vec::with_capacity(raw.len());

    for chunk in raw.chunks(config.max_statement_params) {
        let sql = format!(
            "SELECT latitude, longitude FROM current_nodes WHERE id IN ({})",
            markers(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok(Coordinate::from_fixed(row.get(0)?, row.get(1)?))
        })?;
        for row in rows {
            coords.push(row?);
        }
    }
    Ok(coords)
}

// =============================================================================
// History and Diagnostics
// =============================================================================

/// Every version recorded in history for one entity, ascending.
pub fn history_versions(conn: &Connection, kind: EntityKind, id: EntityId) -> Result<Vec<Version>> {
    let (table, owner) = match kind {
        EntityKind::Point => ("nodes", "node_id"),
        EntityKind::Line => ("ways", "way_id"),
        EntityKind::Grouping => ("relations", "relation_id"),
    };
    let sql = format!(
        "SELECT version FROM {} WHERE {} = ?1 ORDER BY version",
        table, owner
    );
    let mut stmt = conn.prepare(&sql)?;
    let versions = stmt
        .query_map(params![id.as_raw()], |row| {
            Ok(Version::from_raw(row.get::<_, i64>(0)? as u64))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(versions)
}

/// Row count of every engine table, keyed by table name.
pub fn row_counts(conn: &Connection) -> Result<BTreeMap<&'static str, i64>> {
    let mut counts = BTreeMap::new();
    for table in ENTITY_TABLES {
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table],
            |row| row.get(0),
        )?;
        if !exists {
            continue;
        }
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        counts.insert(table, count);
    }
    Ok(counts)
}

/// Next id each sequence will hand out, keyed by entity kind.
pub fn next_ids(conn: &Connection) -> Result<BTreeMap<String, i64>> {
    let mut stmt = conn.prepare("SELECT entity, next_id FROM id_sequences")?;
    let next = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
    Ok(next)
}
