//! Point (`node`) persistence.

use rusqlite::types::Value;
use rusqlite::{params, Connection};
use tracing::debug;

use super::{
    current_tag_rows, final_revisions, history_tag_rows, plan_revisions, strip_dependents,
    ApplyContext, EntityManager, Tables,
};
use crate::codec::PointRecord;
use crate::error::{Error, Result};
use crate::remap::IdRemap;
use crate::types::{Action, Coordinate, EntityId, EntityKind, EntityRef, Version};
use crate::writer::{Row, TableSpec};

pub static POINT_TABLES: Tables = Tables {
    kind: EntityKind::Point,
    current: TableSpec::new(
        "current_nodes",
        &[
            "id",
            "latitude",
            "longitude",
            "changeset_id",
            "visible",
            "timestamp",
            "tile",
            "version",
        ],
    ),
    history: TableSpec::new(
        "nodes",
        &[
            "node_id",
            "version",
            "latitude",
            "longitude",
            "changeset_id",
            "visible",
            "timestamp",
            "tile",
        ],
    ),
    snapshot_select: "id, version, latitude, longitude, changeset_id, visible, timestamp, tile",
    current_tags: TableSpec::new("current_node_tags", &["node_id", "k", "v"]),
    history_tags: TableSpec::new("node_tags", &["node_id", "version", "k", "v"]),
    current_refs: None,
    history_refs: None,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct PointManager;

/// Coordinate of a create/modify record. The codec guarantees one.
fn coordinate_of(record: &PointRecord) -> Result<Coordinate> {
    record.coordinate.ok_or_else(|| {
        Error::parse(format!(
            "node {} has no coordinate",
            record.meta.id
        ))
    })
}

fn history_row(
    id: EntityId,
    version: Version,
    coord: Coordinate,
    changeset: i64,
    visible: bool,
    now_ms: u64,
) -> Row {
    vec![
        Value::Integer(id.as_raw()),
        Value::Integer(version.as_raw() as i64),
        Value::Integer(coord.lat as i64),
        Value::Integer(coord.lon as i64),
        Value::Integer(changeset),
        Value::Integer(visible as i64),
        Value::Integer(now_ms as i64),
        Value::Integer(coord.tile() as i64),
    ]
}

impl EntityManager for PointManager {
    type Record = PointRecord;

    fn tables(&self) -> &'static Tables {
        &POINT_TABLES
    }

    fn create(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
        records: &[PointRecord],
        remap: &mut IdRemap,
    ) -> Result<Vec<EntityId>> {
        let writer = ctx.writer(conn);

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let coord = coordinate_of(record)?;
            rows.push(vec![
                Value::Integer(coord.lat as i64),
                Value::Integer(coord.lon as i64),
                Value::Integer(ctx.owner(&record.meta).as_raw()),
                Value::Integer(record.meta.visible as i64),
                Value::Integer(ctx.now_ms as i64),
                Value::Integer(coord.tile() as i64),
                Value::Integer(Version::FIRST.as_raw() as i64),
            ]);
        }

        let ids = writer.insert_with_ids(EntityKind::Point, &POINT_TABLES.current, rows)?;

        let mut tags = Vec::new();
        let mut history = Vec::with_capacity(records.len());
        let mut history_tags = Vec::new();

        for (record, &id) in records.iter().zip(&ids) {
            if let EntityRef::Placeholder(placeholder) = record.meta.id {
                remap.record(EntityKind::Point, placeholder, id)?;
            }
            let coord = coordinate_of(record)?;
            tags.extend(current_tag_rows(id, &record.meta.tags));
            history.push(history_row(
                id,
                Version::FIRST,
                coord,
                ctx.owner(&record.meta).as_raw(),
                record.meta.visible,
                ctx.now_ms,
            ));
            history_tags.extend(history_tag_rows(id, Version::FIRST, &record.meta.tags));
        }

        writer.insert_rows(&POINT_TABLES.current_tags, &tags)?;
        writer.insert_rows(&POINT_TABLES.history, &history)?;
        writer.insert_rows(&POINT_TABLES.history_tags, &history_tags)?;

        debug!(count = ids.len(), tags = tags.len(), "created points");
        Ok(ids)
    }

    fn modify(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
        records: &[PointRecord],
        _remap: &IdRemap,
    ) -> Result<Vec<EntityId>> {
        let writer = ctx.writer(conn);
        let revisions = plan_revisions(conn, ctx, &POINT_TABLES, records, Action::Modify)?;

        let mut update = conn.prepare_cached(
            "UPDATE current_nodes SET latitude = ?1, longitude = ?2, changeset_id = ?3, \
             visible = ?4, timestamp = ?5, tile = ?6, version = ?7 WHERE id = ?8",
        )?;

        let mut history = Vec::with_capacity(revisions.len());
        let mut history_tags = Vec::new();

        for revision in &revisions {
            let record = &records[revision.index];
            let coord = coordinate_of(record)?;
            let owner = ctx.owner(&record.meta).as_raw();

            update.execute(params![
                coord.lat,
                coord.lon,
                owner,
                true,
                ctx.now_ms as i64,
                coord.tile() as i64,
                revision.version.as_raw() as i64,
                revision.id.as_raw()
            ])?;

            history.push(history_row(
                revision.id,
                revision.version,
                coord,
                owner,
                true,
                ctx.now_ms,
            ));
            history_tags.extend(history_tag_rows(revision.id, revision.version, &record.meta.tags));
        }

        let ids: Vec<EntityId> = revisions.iter().map(|r| r.id).collect();
        strip_dependents(conn, &POINT_TABLES, &ids, ctx.config)?;

        let tags: Vec<Row> = final_revisions(&revisions)
            .iter()
            .flat_map(|r| current_tag_rows(r.id, &records[r.index].meta.tags))
            .collect();

        writer.insert_rows(&POINT_TABLES.current_tags, &tags)?;
        writer.insert_rows(&POINT_TABLES.history, &history)?;
        writer.insert_rows(&POINT_TABLES.history_tags, &history_tags)?;

        debug!(count = ids.len(), "modified points");
        Ok(ids)
    }
}
