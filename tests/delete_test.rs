//! Deleting lines and groupings leaves a tombstone with no dependents.

mod common;

use common::{apply, count, created, db_with_changeset};
use roadgraph::reader;
use roadgraph::{EntityId, EntityKind, Version};

fn seed(db: &mut roadgraph::Database, cs: roadgraph::ChangesetId) -> (EntityId, EntityId, EntityId) {
    let outcome = apply(
        db,
        cs,
        r#"{"create": {
            "node": [{"id": -1, "lat": 1, "lon": 1}, {"id": -2, "lat": 2, "lon": 2}],
            "way": {"id": -1, "nd": [{"ref": -1}, {"ref": -2}, {"ref": -1}],
                    "tag": [{"k": "highway", "v": "service"}, {"k": "area", "v": "no"}]},
            "relation": {"id": -1, "member": [
                {"type": "way", "ref": -1, "role": "outer"},
                {"type": "node", "ref": -2, "role": "label"}
            ], "tag": {"k": "type", "v": "multipolygon"}}
        }}"#,
    )
    .unwrap();
    (
        created(&outcome, EntityKind::Point, -1),
        created(&outcome, EntityKind::Line, -1),
        created(&outcome, EntityKind::Grouping, -1),
    )
}

#[test]
fn test_delete_line_strips_references_and_tags() {
    let (mut db, cs) = db_with_changeset();
    let (point, line, _) = seed(&mut db, cs);

    let text = format!(r#"{{"delete": {{"way": {{"id": {}, "version": 1}}}}}}"#, line.as_raw());
    let outcome = apply(&mut db, cs, &text).unwrap();
    assert_eq!(outcome.deleted.line, vec![line]);

    let conn = db.connection();
    assert_eq!(count(conn, "SELECT COUNT(*) FROM current_way_nodes WHERE way_id = ?1", line.as_raw()), 0);
    assert_eq!(count(conn, "SELECT COUNT(*) FROM current_way_tags WHERE way_id = ?1", line.as_raw()), 0);

    let stored = reader::load_line(conn, line).unwrap().unwrap();
    assert!(!stored.meta.visible);
    assert_eq!(stored.meta.version, Version::from_raw(2));
    assert!(stored.nodes.is_empty());

    // History still holds version 1 with its references.
    assert_eq!(
        count(conn, "SELECT COUNT(*) FROM way_nodes WHERE way_id = ?1 AND version = 1", line.as_raw()),
        3
    );
    // Referenced points are untouched.
    let untouched = reader::load_point(conn, point).unwrap().unwrap();
    assert!(untouched.meta.visible);
}

#[test]
fn test_delete_grouping_strips_members_and_tags() {
    let (mut db, cs) = db_with_changeset();
    let (_, line, grouping) = seed(&mut db, cs);

    let text = format!(r#"{{"delete": {{"relation": {{"id": {}}}}}}}"#, grouping.as_raw());
    let outcome = apply(&mut db, cs, &text).unwrap();
    assert_eq!(outcome.deleted.grouping, vec![grouping]);

    let conn = db.connection();
    assert_eq!(
        count(conn, "SELECT COUNT(*) FROM current_relation_members WHERE relation_id = ?1", grouping.as_raw()),
        0
    );
    assert_eq!(
        count(conn, "SELECT COUNT(*) FROM current_relation_tags WHERE relation_id = ?1", grouping.as_raw()),
        0
    );

    let stored = reader::load_grouping(conn, grouping).unwrap().unwrap();
    assert!(!stored.meta.visible);
    assert_eq!(stored.meta.version, Version::from_raw(2));
    assert_eq!(stored.meta.changeset, cs);
    assert_eq!(
        reader::history_versions(conn, EntityKind::Grouping, grouping).unwrap(),
        vec![Version::FIRST, Version::from_raw(2)]
    );

    // The member line keeps its own references.
    assert_eq!(count(conn, "SELECT COUNT(*) FROM current_way_nodes WHERE way_id = ?1", line.as_raw()), 3);
}

#[test]
fn test_delete_line_and_grouping_together() {
    let (mut db, cs) = db_with_changeset();
    let (_, line, grouping) = seed(&mut db, cs);

    let text = format!(
        r#"{{"delete": {{"way": {{"id": {}}}, "relation": {{"id": {}}}}}}}"#,
        line.as_raw(),
        grouping.as_raw()
    );
    apply(&mut db, cs, &text).unwrap();

    let counts = reader::row_counts(db.connection()).unwrap();
    assert_eq!(counts["current_way_nodes"], 0);
    assert_eq!(counts["current_way_tags"], 0);
    assert_eq!(counts["current_relation_members"], 0);
    assert_eq!(counts["current_relation_tags"], 0);
    assert_eq!(counts["current_ways"], 1);
    assert_eq!(counts["current_relations"], 1);
}
