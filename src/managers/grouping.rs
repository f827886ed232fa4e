//! Grouping (`relation`) persistence.
//!
//! Members are typed and may name any kind, including other groupings in
//! the same batch. On create every new grouping is recorded in the
//! [`IdRemap`] before any member is resolved, so members may point forward
//! or back within the batch (or at the grouping itself). Cycles are stored
//! as given.

use rusqlite::types::Value;
use rusqlite::{params, Connection};
use tracing::debug;

use super::{
    current_tag_rows, final_revisions, history_tag_rows, plan_revisions, strip_dependents,
    ApplyContext, EntityManager, Tables,
};
use crate::codec::GroupingRecord;
use crate::error::Result;
use crate::remap::IdRemap;
use crate::types::{Action, EntityId, EntityKind, EntityRef, Version};
use crate::writer::{Row, TableSpec};

const CURRENT_MEMBERS: TableSpec = TableSpec::new(
    "current_relation_members",
    &["relation_id", "member_type", "member_id", "member_role", "sequence_id"],
);
const MEMBERS: TableSpec = TableSpec::new(
    "relation_members",
    &[
        "relation_id",
        "version",
        "member_type",
        "member_id",
        "member_role",
        "sequence_id",
    ],
);

pub static GROUPING_TABLES: Tables = Tables {
    kind: EntityKind::Grouping,
    current: TableSpec::new(
        "current_relations",
        &["id", "changeset_id", "timestamp", "visible", "version"],
    ),
    history: TableSpec::new(
        "relations",
        &["relation_id", "version", "changeset_id", "timestamp", "visible"],
    ),
    snapshot_select: "id, version, changeset_id, timestamp, visible",
    current_tags: TableSpec::new("current_relation_tags", &["relation_id", "k", "v"]),
    history_tags: TableSpec::new("relation_tags", &["relation_id", "version", "k", "v"]),
    current_refs: Some(CURRENT_MEMBERS),
    history_refs: Some(MEMBERS),
};

#[derive(Debug, Default, Clone, Copy)]
pub struct GroupingManager;

/// A member with its reference resolved to a server id.
struct ResolvedMember<'r> {
    kind: EntityKind,
    id: EntityId,
    role: &'r str,
}

fn resolve_members<'r>(
    records: &'r [GroupingRecord],
    remap: &IdRemap,
) -> Result<Vec<Vec<ResolvedMember<'r>>>> {
    records
        .iter()
        .map(|record| {
            record
                .members
                .iter()
                .map(|member| {
                    Ok(ResolvedMember {
                        kind: member.kind,
                        id: remap.resolve(member.kind, member.reference)?,
                        role: &member.role,
                    })
                })
                .collect()
        })
        .collect()
}

fn member_rows<'a>(
    id: EntityId,
    version: Option<Version>,
    members: &'a [ResolvedMember<'a>],
) -> impl Iterator<Item = Row> + 'a {
    members.iter().enumerate().map(move |(sequence, member)| {
        let mut row = Vec::with_capacity(6);
        row.push(Value::Integer(id.as_raw()));
        if let Some(version) = version {
            row.push(Value::Integer(version.as_raw() as i64));
        }
        row.push(Value::Text(member.kind.member_type().to_string()));
        row.push(Value::Integer(member.id.as_raw()));
        row.push(Value::Text(member.role.to_string()));
        row.push(Value::Integer(sequence as i64));
        row
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

/// Rows accumulated for one create or modify pass.
#[derive(Default)]
struct PendingRows {
    members: Vec<Row>,
    tags: Vec<Row>,
    history: Vec<Row>,
    history_members: Vec<Row>,
    history_tags: Vec<Row>,
}

impl PendingRows {
    fn write(&self, ctx: &ApplyContext<'_>, conn: &Connection) -> Result<()> {
        let writer = ctx.writer(conn);
        writer.insert_rows(&CURRENT_MEMBERS, &self.members)?;
        writer.insert_rows(&GROUPING_TABLES.current_tags, &self.tags)?;
        writer.insert_rows(&GROUPING_TABLES.history, &self.history)?;
        writer.insert_rows(&MEMBERS, &self.history_members)?;
        writer.insert_rows(&GROUPING_TABLES.history_tags, &self.history_tags)?;
        Ok(())
    }
}

impl EntityManager for GroupingManager {
    type Record = GroupingRecord;

    fn tables(&self) -> &'static Tables {
        &GROUPING_TABLES
    }

    fn create(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
        records: &[GroupingRecord],
        remap: &mut IdRemap,
    ) -> Result<Vec<EntityId>> {
        let writer = ctx.writer(conn);

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

        let ids = writer.insert_with_ids(EntityKind::Grouping, &GROUPING_TABLES.current, rows)?;

        for (record, &id) in records.iter().zip(&ids) {
            if let EntityRef::Placeholder(placeholder) = record.meta.id {
                remap.record(EntityKind::Grouping, placeholder, id)?;
            }
        }

        let members = resolve_members(records, remap)?;
        let mut pending = PendingRows::default();

        for ((record, &id), members) in records.iter().zip(&ids).zip(&members) {
            pending.members.extend(member_rows(id, None, members));
            pending.tags.extend(current_tag_rows(id, &record.meta.tags));
            pending.history.push(history_row(
                id,
                Version::FIRST,
                ctx.owner(&record.meta).as_raw(),
                ctx.now_ms,
                record.meta.visible,
            ));
            pending
                .history_members
                .extend(member_rows(id, Some(Version::FIRST), members));
            pending
                .history_tags
                .extend(history_tag_rows(id, Version::FIRST, &record.meta.tags));
        }

        pending.write(ctx, conn)?;

        debug!(count = ids.len(), members = pending.members.len(), "created groupings");
        Ok(ids)
    }

    fn modify(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
        records: &[GroupingRecord],
        remap: &IdRemap,
    ) -> Result<Vec<EntityId>> {
        let members = resolve_members(records, remap)?;
        let revisions = plan_revisions(conn, ctx, &GROUPING_TABLES, records, Action::Modify)?;

        let mut update = conn.prepare_cached(
            "UPDATE current_relations SET changeset_id = ?1, timestamp = ?2, visible = ?3, \
             version = ?4 WHERE id = ?5",
        )?;

        let mut pending = PendingRows::default();

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

            pending.history.push(history_row(
                revision.id,
                revision.version,
                owner,
                ctx.now_ms,
                true,
            ));
            pending.history_members.extend(member_rows(
                revision.id,
                Some(revision.version),
                &members[revision.index],
            ));
            pending
                .history_tags
                .extend(history_tag_rows(revision.id, revision.version, &record.meta.tags));
        }

        let ids: Vec<EntityId> = revisions.iter().map(|r| r.id).collect();
        strip_dependents(conn, &GROUPING_TABLES, &ids, ctx.config)?;

        for revision in final_revisions(&revisions) {
            pending
                .members
                .extend(member_rows(revision.id, None, &members[revision.index]));
            pending
                .tags
                .extend(current_tag_rows(revision.id, &records[revision.index].meta.tags));
        }

        pending.write(ctx, conn)?;

        debug!(count = ids.len(), "modified groupings");
        Ok(ids)
    }
}
