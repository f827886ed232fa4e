//! # Changeset Coordinator
//!
//! The coordinator applies one decoded document inside one SQLite
//! transaction. It owns that transaction and the [`IdRemap`]; the managers
//! only run statements within it.
//!
//! ## Application Order
//!
//! ```text
//!   BEGIN IMMEDIATE
//!   ├─ create:  points → lines → groupings     (placeholders recorded)
//!   ├─ modify:  points → lines → groupings     (placeholders resolved)
//!   ├─ delete:  points → lines → groupings     (soft delete)
//!   ├─ widen changeset bbox, add change count, set closed_at
//!   └─ COMMIT   (or ROLLBACK on any error / cancellation)
//! ```
//!
//! Creating points before lines before groupings is what lets a document
//! reference, in a later element, an entity it creates in an earlier one.
//! Interleavings outside this order, such as deleting an entity and then
//! creating one under the same placeholder, are not supported.
//!
//! ## Failure Semantics
//!
//! Errors from any step propagate unchanged. The transaction is dropped
//! without commit, which rolls back every statement the apply issued, so
//! storage is exactly as it was before the call.

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};

use crate::changeset::{self, ChangesetSummary};
use crate::codec::ChangeDocument;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::managers::{
    ApplyContext, EntityManager, GroupingManager, LineManager, PointManager,
};
use crate::reader;
use crate::remap::{CreatedIds, IdRemap};
use crate::types::{current_time_ms, Action, BoundingBox, ChangesetId, EntityId, EntityKind};

// =============================================================================
// Outcome
// =============================================================================

/// Server ids touched by one action, per kind, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AffectedIds {
    #[serde(rename = "node")]
    pub point: Vec<EntityId>,
    #[serde(rename = "way")]
    pub line: Vec<EntityId>,
    #[serde(rename = "relation")]
    pub grouping: Vec<EntityId>,
}

impl AffectedIds {
    pub fn of(&self, kind: EntityKind) -> &[EntityId] {
        match kind {
            EntityKind::Point => &self.point,
            EntityKind::Line => &self.line,
            EntityKind::Grouping => &self.grouping,
        }
    }

    fn of_mut(&mut self, kind: EntityKind) -> &mut Vec<EntityId> {
        match kind {
            EntityKind::Point => &mut self.point,
            EntityKind::Line => &mut self.line,
            EntityKind::Grouping => &mut self.grouping,
        }
    }

    pub fn total(&self) -> usize {
        self.point.len() + self.line.len() + self.grouping.len()
    }
}

/// Result of a committed changeset.
///
/// Serializes as the upload response body:
///
/// ```json
/// {"created": {"node": {"-1": 11}, "way": {}, "relation": {}},
///  "changeset": {"id": 3, "user_id": 99, "num_changes": 1, ...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    /// Placeholder → server id, per kind.
    pub created: CreatedIds,
    /// The changeset row after this apply.
    pub changeset: ChangesetSummary,
    #[serde(skip)]
    pub modified: AffectedIds,
    #[serde(skip)]
    pub deleted: AffectedIds,
}

impl ApplyOutcome {
    /// Entities created, modified or deleted.
    pub fn total_changes(&self) -> usize {
        self.created.total() + self.modified.total() + self.deleted.total()
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Applies change documents with a given engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct Coordinator<'a> {
    config: &'a EngineConfig,
}

impl<'a> Coordinator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Applies `document` under `changeset` and commits.
    ///
    /// # Errors
    ///
    /// Any error leaves storage untouched. See [`Error`] for the variants.
    pub fn apply_changeset(
        &self,
        conn: &mut Connection,
        document: &ChangeDocument,
        changeset: ChangesetId,
    ) -> Result<ApplyOutcome> {
        self.apply_changeset_with(conn, document, changeset, || true)
    }

    /// Like [`apply_changeset`](Self::apply_changeset), but asks
    /// `should_commit` right before committing. A `false` answer rolls the
    /// transaction back and returns [`Error::Cancelled`].
    pub fn apply_changeset_with(
        &self,
        conn: &mut Connection,
        document: &ChangeDocument,
        changeset: ChangesetId,
        should_commit: impl FnOnce() -> bool,
    ) -> Result<ApplyOutcome> {
        let txn = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = match self.apply_in(&txn, document, changeset) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    changeset = %changeset,
                    kind = err.kind(),
                    error = %err,
                    "changeset rejected, rolling back"
                );
                return Err(err);
            }
        };

        if !should_commit() {
            warn!(changeset = %changeset, "caller went away before commit, rolling back");
            txn.rollback()?;
            return Err(Error::Cancelled);
        }

        txn.commit()?;

        info!(
            changeset = %changeset,
            created = outcome.created.total(),
            modified = outcome.modified.total(),
            deleted = outcome.deleted.total(),
            num_changes = outcome.changeset.num_changes,
            "changeset applied"
        );
        Ok(outcome)
    }

    /// Every step between BEGIN and COMMIT.
    fn apply_in(
        &self,
        conn: &Connection,
        document: &ChangeDocument,
        changeset: ChangesetId,
    ) -> Result<ApplyOutcome> {
        // Fails with ChangesetNotFound before any entity row is written.
        changeset::load_changeset(conn, changeset)?;

        let ctx = ApplyContext {
            changeset,
            now_ms: current_time_ms(),
            config: self.config,
        };
        let mut remap = IdRemap::new();
        let mut modified = AffectedIds::default();
        let mut deleted = AffectedIds::default();

        for action in Action::ALL {
            let block = document.block(action);
            for kind in EntityKind::ALL {
                if block.count(kind) == 0 {
                    continue;
                }
                let ids = match kind {
                    EntityKind::Point => {
                        run(&PointManager, action, conn, &ctx, &block.points[..], &mut remap)?
                    }
                    EntityKind::Line => {
                        run(&LineManager, action, conn, &ctx, &block.lines[..], &mut remap)?
                    }
                    EntityKind::Grouping => {
                        run(&GroupingManager, action, conn, &ctx, &block.groupings[..], &mut remap)?
                    }
                };
                match action {
                    Action::Create => {}
                    Action::Modify => modified.of_mut(kind).extend(ids),
                    Action::Delete => deleted.of_mut(kind).extend(ids),
                }
            }
        }

        let bbox = touched_bbox(conn, document, &deleted.point, self.config)?;
        let created = remap.created();
        let changes = (document.create.len() + modified.total() + deleted.total()) as u64;

        let summary = changeset::record_changes(conn, changeset, bbox, changes, ctx.now_ms)?;

        Ok(ApplyOutcome {
            created,
            changeset: summary,
            modified,
            deleted,
        })
    }
}

/// Dispatches one (action, kind) batch to its manager.
fn run<M: EntityManager>(
    manager: &M,
    action: Action,
    conn: &Connection,
    ctx: &ApplyContext<'_>,
    records: &[M::Record],
    remap: &mut IdRemap,
) -> Result<Vec<EntityId>> {
    match action {
        Action::Create => manager.create(conn, ctx, records, remap),
        Action::Modify => manager.modify(conn, ctx, records, remap),
        Action::Delete => manager.delete(conn, ctx, records),
    }
}

/// Bounds of every point coordinate the document touched: created and
/// modified points as written, deleted points as stored.
fn touched_bbox(
    conn: &Connection,
    document: &ChangeDocument,
    deleted_points: &[EntityId],
    config: &EngineConfig,
) -> Result<Option<BoundingBox>> {
    let mut coords: Vec<_> = document
        .create
        .points
        .iter()
        .chain(&document.modify.points)
        .filter_map(|point| point.coordinate)
        .collect();

    coords.extend(reader::point_coordinates(conn, deleted_points, config)?);

    Ok(BoundingBox::from_coordinates(&coords))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_document;
    use crate::config::UnknownAttributePolicy;
    use crate::schema::Database;

    fn doc(text: &str) -> ChangeDocument {
        decode_document(text, UnknownAttributePolicy::Ignore).expect("document should decode")
    }

    #[test]
    fn test_apply_creates_and_reports() {
        let mut db = Database::open_in_memory().unwrap();
        let cs = db.open_changeset(99).unwrap();

        let outcome = db
            .apply_changeset(
                &doc(r#"{"create": {
                    "node": [{"id": -1, "lat": 1, "lon": 2}, {"id": -2, "lat": 3, "lon": 4}],
                    "way": {"id": -1, "nd": [{"ref": -1}, {"ref": -2}]}
                }}"#),
                cs.id,
            )
            .unwrap();

        assert_eq!(outcome.created.point.len(), 2);
        assert_eq!(outcome.created.line.len(), 1);
        assert_eq!(outcome.changeset.num_changes, 3);
        assert_eq!(outcome.total_changes(), 3);
        assert!(outcome.changeset.bbox.is_some());
    }

    #[test]
    fn test_cancel_before_commit_rolls_back() {
        let mut db = Database::open_in_memory().unwrap();
        let cs = db.open_changeset(1).unwrap();
        let config = db.config().clone();

        let err = Coordinator::new(&config)
            .apply_changeset_with(
                db.connection_mut(),
                &doc(r#"{"create": {"node": {"id": -1, "lat": 0, "lon": 0}}}"#),
                cs.id,
                || false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let nodes: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM current_nodes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(nodes, 0);
        assert_eq!(db.load_changeset(cs.id).unwrap().num_changes, 0);
    }

    #[test]
    fn test_unknown_changeset() {
        let mut db = Database::open_in_memory().unwrap();
        let err = db
            .apply_changeset(
                &doc(r#"{"create": {"node": {"id": -1, "lat": 0, "lon": 0}}}"#),
                ChangesetId::from_raw(12345),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ChangesetNotFound { .. }));
    }

    #[test]
    fn test_outcome_json_shape() {
        let mut db = Database::open_in_memory().unwrap();
        let cs = db.open_changeset(99).unwrap();
        let outcome = db
            .apply_changeset(
                &doc(r#"{"create": {"node": {"id": -5, "lat": 0, "lon": 0}}}"#),
                cs.id,
            )
            .unwrap();

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["created"]["node"]["-5"], 1);
        assert!(json["created"]["way"].as_object().unwrap().is_empty());
        assert_eq!(json["changeset"]["num_changes"], 1);
        assert!(json.get("modified").is_none());
    }
}
