//! Line (`way`) persistence.
//!
//! A line is an ordered list of point references. References are resolved
//! through the [`IdRemap`] before any line row is written, so a line can
//! point at points created earlier in the same document. Sequence indexes
//! start at zero and follow document order.

use rusqlite::types::Value;
use rusqlite::{params, Connection};
use tracing::debug;

use super::{
    current_tag_rows, final_revisions, history_tag_rows, plan_revisions, strip_dependents,
    ApplyContext, EntityManager, Tables,
};
use crate::codec::LineRecord;
use crate::error::Result;
use crate::remap::IdRemap;
use crate::types::{Action, EntityId, EntityKind, EntityRef, Version};
use crate::writer::{Row, TableSpec};

const CURRENT_WAY_NODES: TableSpec =
    TableSpec::new("current_way_nodes", &["way_id", "node_id", "sequence_id"]);
const WAY_NODES: TableSpec =
    TableSpec::new("way_nodes", &["way_id", "version", "node_id", "sequence_id"]);

pub static LINE_TABLES: Tables = Tables {
    kind: EntityKind::Line,
    current: TableSpec::new(
        "current_ways",
        &["id", "changeset_id", "timestamp", "visible", "version"],
    ),
    history: TableSpec::new(
        "ways",
        &["way_id", "version", "changeset_id", "timestamp", "visible"],
    ),
    snapshot_select: "id, version, changeset_id, timestamp, visible",
    current_tags: TableSpec::new("current_way_tags", &["way_id", "k", "v"]),
    history_tags: TableSpec::new("way_tags", &["way_id", "version", "k", "v"]),
    current_refs: Some(CURRENT_WAY_NODES),
    history_refs: Some(WAY_NODES),
};

#[derive(Debug, Default, Clone, Copy)]
pub struct LineManager;

/// Resolves every point reference of every record, in order.
fn resolve_nodes(records: &[LineRecord], remap: &IdRemap) -> Result<Vec<Vec<EntityId>>> {
    records
        .iter()
        .map(|record| {
            record
                .nodes
                .iter()
                .map(|&node| remap.resolve(EntityKind::Point, node))
                .collect()
        })
        .collect()
}

fn current_node_rows(id: EntityId, nodes: &[EntityId]) -> impl Iterator<Item = Row> + '_ {
    nodes.iter().enumerate().map(move |(sequence, node)| {
        vec![
            Value::Integer(id.as_raw()),
            Value::Integer(node.as_raw()),
            Value::Integer(sequence as i64),
        ]
    })
}

fn history_node_rows(
    id: EntityId,
    version: Version,
    nodes: &[EntityId],
) -> impl Iterator<Item = Row> + '_ {
    nodes.iter().enumerate().map(move |(sequence, node)| {
        vec![
            Value::Integer(id.as_raw()),
            Value::Integer(version.as_raw() as i64),
            Value::Integer(node.as_raw()),
            Value::Integer(sequence as i64),
        ]
    })
}

fn history_row(id: EntityId, version: Version, changeset: i64, now_ms: u64, visible: bool) -> Row {
    vec![
        Value::Integer(id.as_raw()),
        Value::Integer(version.as_raw() as i64),
        Value::Integer(changeset),
        Value::Integer(now_ms as i64),
        Value::Integer(visible as i64),
    ]
}

impl EntityManager for LineManager {
    type Record = LineRecord;

    fn tables(&self) -> &'static Tables {
        &LINE_TABLES
    }

    fn create(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
        records: &[LineRecord],
        remap: &mut IdRemap,
    ) -> Result<Vec<EntityId>> {
        let writer = ctx.writer(conn);

        // Every referenced point must be known before a line row exists.
        let nodes = resolve_nodes(records, remap)?;

        let rows: Vec<Row> = records
            .iter()
            .map(|record| {
                vec![
                    Value::Integer(ctx.owner(&record.meta).as_raw()),
                    Value::Integer(ctx.now_ms as i64),
                    Value::Integer(record.meta.visible as i64),
                    Value::Integer(Version::FIRST.as_raw() as i64),
                ]
            })
            .collect();

        let ids = writer.insert_with_ids(EntityKind::Line, &LINE_TABLES.current, rows)?;

        let mut refs = Vec::new();
        let mut tags = Vec::new();
        let mut history = Vec::with_capacity(records.len());
        let mut history_refs = Vec::new();
        let mut history_tags = Vec::new();

        for ((record, &id), nodes) in records.iter().zip(&ids).zip(&nodes) {
            if let EntityRef::Placeholder(placeholder) = record.meta.id {
                remap.record(EntityKind::Line, placeholder, id)?;
            }
            refs.extend(current_node_rows(id, nodes));
            tags.extend(current_tag_rows(id, &record.meta.tags));
            history.push(history_row(
                id,
                Version::FIRST,
                ctx.owner(&record.meta).as_raw(),
                ctx.now_ms,
                record.meta.visible,
            ));
            history_refs.extend(history_node_rows(id, Version::FIRST, nodes));
            history_tags.extend(history_tag_rows(id, Version::FIRST, &record.meta.tags));
        }

        write_dependents(ctx, conn, &refs, &tags, &history, &history_refs, &history_tags)?;

        debug!(count = ids.len(), refs = refs.len(), "created lines");
        Ok(ids)
    }

    fn modify(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
        records: &[LineRecord],
        remap: &IdRemap,
    ) -> Result<Vec<EntityId>> {
        let nodes = resolve_nodes(records, remap)?;
        let revisions = plan_revisions(conn, ctx, &LINE_TABLES, records, Action::Modify)?;

        let mut update = conn.prepare_cached(
            "UPDATE current_ways SET changeset_id = ?1, timestamp = ?2, visible = ?3, version = ?4 \
             WHERE id = ?5",
        )?;

        let mut history = Vec::with_capacity(revisions.len());
        let mut history_refs = Vec::new();
        let mut history_tags = Vec::new();

        for revision in &revisions {
            let record = &records[revision.index];
            let owner = ctx.owner(&record.meta).as_raw();

            update.execute(params![
                owner,
                ctx.now_ms as i64,
                true,
                revision.version.as_raw() as i64,
                revision.id.as_raw()
            ])?;

            history.push(history_row(
                revision.id,
                revision.version,
                owner,
                ctx.now_ms,
                true,
            ));
            history_refs.extend(history_node_rows(
                revision.id,
                revision.version,
                &nodes[revision.index],
            ));
            history_tags.extend(history_tag_rows(revision.id, revision.version, &record.meta.tags));
        }

        let ids: Vec<EntityId> = revisions.iter().map(|r| r.id).collect();
        strip_dependents(conn, &LINE_TABLES, &ids, ctx.config)?;

        let mut refs = Vec::new();
        let mut tags = Vec::new();
        for revision in final_revisions(&revisions) {
            refs.extend(current_node_rows(revision.id, &nodes[revision.index]));
            tags.extend(current_tag_rows(revision.id, &records[revision.index].meta.tags));
        }

        write_dependents(ctx, conn, &refs, &tags, &history, &history_refs, &history_tags)?;

        debug!(count = ids.len(), refs = refs.len(), "modified lines");
        Ok(ids)
    }
}

fn write_dependents(
    ctx: &ApplyContext<'_>,
    conn: &Connection,
    refs: &[Row],
    tags: &[Row],
    history: &[Row],
    history_refs: &[Row],
    history_tags: &[Row],
) -> Result<()> {
    let writer = ctx.writer(conn);
    writer.insert_rows(&CURRENT_WAY_NODES, refs)?;
    writer.insert_rows(&WAY_NODES, history_refs)?;
    writer.insert_rows(&LINE_TABLES.current_tags, tags)?;
    writer.insert_rows(&LINE_TABLES.history, history)?;
    writer.insert_rows(&LINE_TABLES.history_tags, history_tags)?;
    Ok(())
}
