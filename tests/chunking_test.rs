//! Large uploads split across many insert statements must still map every
//! placeholder to the row written for it.

mod common;

use common::{apply, created, db_with_config};
use roadgraph::reader;
use roadgraph::{Coordinate, EngineConfig, EntityKind};

/// `n` points with placeholder `-(i + 1)` at latitude `i / 100` and one tag
/// naming their index.
fn points_document(n: usize) -> String {
    let nodes: Vec<String> = (0..n)
        .map(|i| {
            format!(
                r#"{{"id": -{}, "lat": {}, "lon": 0, "tag": {{"k": "index", "v": "{}"}}}}"#,
                i + 1,
                i as f64 / 100.0,
                i
            )
        })
        .collect();
    format!(r#"{{"create": {{"node": [{}]}}}}"#, nodes.join(", "))
}

fn small_batches() -> EngineConfig {
    EngineConfig {
        max_rows_per_batch: 3,
        max_statement_params: 16,
        ..EngineConfig::default()
    }
}

#[test]
fn test_chunked_create_keeps_placeholder_order() {
    let (mut db, cs) = db_with_config(small_batches());
    let n = 50;

    let outcome = apply(&mut db, cs, &points_document(n)).unwrap();
    assert_eq!(outcome.created.point.len(), n);

    for i in 0..n {
        let placeholder = -(i as i64 + 1);
        let id = created(&outcome, EntityKind::Point, placeholder);
        let stored = reader::load_point(db.connection(), id).unwrap().unwrap();

        let expected = Coordinate::from_degrees(i as f64 / 100.0, 0.0).unwrap();
        assert_eq!(stored.coordinate, expected, "placeholder {placeholder}");
        assert_eq!(stored.tags[0].value, i.to_string(), "placeholder {placeholder}");
    }
}

#[test]
fn test_chunked_ids_are_contiguous() {
    let (mut db, cs) = db_with_config(small_batches());

    let outcome = apply(&mut db, cs, &points_document(20)).unwrap();
    let mut ids: Vec<i64> = outcome.created.point.values().copied().collect();
    ids.sort_unstable();

    let first = ids[0];
    assert_eq!(ids, (first..first + 20).collect::<Vec<_>>());
}

#[test]
fn test_long_line_spans_many_reference_chunks() {
    let (mut db, cs) = db_with_config(small_batches());
    let n = 40;

    let nds: Vec<String> = (0..n).map(|i| format!(r#"{{"ref": -{}}}"#, i + 1)).collect();
    let nodes: Vec<String> = (0..n)
        .map(|i| format!(r#"{{"id": -{}, "lat": 0, "lon": {}}}"#, i + 1, i))
        .collect();
    let text = format!(
        r#"{{"create": {{"node": [{}], "way": {{"id": -1, "nd": [{}]}}}}}}"#,
        nodes.join(", "),
        nds.join(", ")
    );

    let outcome = apply(&mut db, cs, &text).unwrap();
    let line = created(&outcome, EntityKind::Line, -1);
    let stored = reader::load_line(db.connection(), line).unwrap().unwrap();

    let expected: Vec<_> = (0..n)
        .map(|i| created(&outcome, EntityKind::Point, -(i as i64 + 1)))
        .collect();
    assert_eq!(stored.nodes, expected);
}

#[test]
fn test_chunked_modify_and_delete() {
    let (mut db, cs) = db_with_config(small_batches());
    let outcome = apply(&mut db, cs, &points_document(12)).unwrap();

    let ids: Vec<i64> = (1..=12)
        .map(|p| created(&outcome, EntityKind::Point, -p).as_raw())
        .collect();

    let modify: Vec<String> = ids
        .iter()
        .map(|id| format!(r#"{{"id": {}, "lat": 1, "lon": 1}}"#, id))
        .collect();
    let delete: Vec<String> = ids.iter().map(|id| format!(r#"{{"id": {}}}"#, id)).collect();

    let text = format!(r#"{{"modify": {{"node": [{}]}}}}"#, modify.join(", "));
    let modified = apply(&mut db, cs, &text).unwrap();
    assert_eq!(modified.modified.point.len(), 12);

    let text = format!(r#"{{"delete": {{"node": [{}]}}}}"#, delete.join(", "));
    let deleted = apply(&mut db, cs, &text).unwrap();
    assert_eq!(deleted.deleted.point.len(), 12);

    let tags: i64 = db
        .connection()
        .query_row("SELECT COUNT(*) FROM current_node_tags", [], |row| row.get(0))
        .unwrap();
    assert_eq!(tags, 0);
    let tombstones: i64 = db
        .connection()
        .query_row("SELECT COUNT(*) FROM nodes WHERE version = 3 AND visible = 0", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(tombstones, 12);
}
