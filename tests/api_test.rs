//! The async handle against an on-disk database.

mod common;

use common::{create_temp_db_file, open_read_only};
use roadgraph::reader;
use roadgraph::{EngineConfig, EntityId, EntityKind, Error, RoadGraph, VersionPolicy};

#[tokio::test]
async fn test_committed_changes_survive_reopen() {
    let (_dir, path) = create_temp_db_file("reopen.db");

    let graph = RoadGraph::open(&path).await.unwrap();
    let cs = graph.open_changeset(99).await.unwrap();
    let outcome = graph
        .apply_json(
            r#"{"create": {
                "node": [{"id": -1, "lat": 1, "lon": 1}, {"id": -2, "lat": 2, "lon": 2}],
                "way": {"id": -1, "nd": [{"ref": -1}, {"ref": -2}], "tag": {"k": "highway", "v": "residential"}}
            }}"#,
            cs.id,
        )
        .await
        .unwrap();
    let line = EntityId::from_raw(outcome.created.get(EntityKind::Line, -1).unwrap());
    graph.shutdown().await;

    let graph = RoadGraph::open(&path).await.unwrap();
    let state = graph.load_entity(EntityKind::Line, line).await.unwrap().unwrap();
    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["type"], "way");
    assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(json["tags"][0]["k"], "highway");

    let summary = graph.load_changeset(cs.id).await.unwrap();
    assert_eq!(summary.num_changes, 3);
    graph.shutdown().await;
}

#[tokio::test]
async fn test_read_only_connection_sees_commits() {
    let (_dir, path) = create_temp_db_file("readers.db");
    let graph = RoadGraph::open(&path).await.unwrap();
    let cs = graph.open_changeset(1).await.unwrap();

    graph
        .apply_json(r#"{"create": {"node": {"id": -1, "lat": 0, "lon": 0}}}"#, cs.id)
        .await
        .unwrap();

    let conn = open_read_only(&path);
    let counts = reader::row_counts(&conn).unwrap();
    assert_eq!(counts["current_nodes"], 1);
    assert_eq!(counts["nodes"], 1);

    graph.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_uploads_are_serialized() {
    let graph = RoadGraph::open_in_memory().await.unwrap();

    let mut tasks = Vec::new();
    for user in 0..8 {
        let graph = graph.clone();
        tasks.push(tokio::spawn(async move {
            let cs = graph.open_changeset(user).await.unwrap();
            graph
                .apply_json(
                    r#"{"create": {"node": [
                        {"id": -1, "lat": 1, "lon": 1},
                        {"id": -2, "lat": 2, "lon": 2}
                    ]}}"#,
                    cs.id,
                )
                .await
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        let outcome = task.await.unwrap();
        assert_eq!(outcome.changeset.num_changes, 2);
        ids.extend(outcome.created.point.values().copied());
    }

    // No two uploads were handed the same id.
    ids.sort_unstable();
    assert_eq!(ids, (1..=16).collect::<Vec<_>>());

    graph.shutdown().await;
}

#[tokio::test]
async fn test_strict_config_through_handle() {
    let config = EngineConfig::default().with_version_policy(VersionPolicy::Strict);
    let graph = RoadGraph::open_in_memory_with_config(config).await.unwrap();
    let cs = graph.open_changeset(1).await.unwrap();

    let outcome = graph
        .apply_json(r#"{"create": {"node": {"id": -1, "lat": 0, "lon": 0}}}"#, cs.id)
        .await
        .unwrap();
    let id = outcome.created.get(EntityKind::Point, -1).unwrap();

    let stale = format!(
        r#"{{"modify": {{"node": {{"id": {}, "version": 4, "lat": 1, "lon": 1}}}}}}"#,
        id
    );
    let err = graph.apply_json(&stale, cs.id).await.unwrap_err();
    assert!(matches!(err, Error::StaleVersion { .. }));

    graph.shutdown().await;
}

#[tokio::test]
async fn test_unknown_changeset_reported() {
    let graph = RoadGraph::open_in_memory().await.unwrap();
    let err = graph
        .apply_json(
            r#"{"create": {"node": {"id": -1, "lat": 0, "lon": 0}}}"#,
            roadgraph::ChangesetId::from_raw(77),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "changeset_not_found");
    assert_eq!(err.offending_ids(), vec![77]);
    graph.shutdown().await;
}
