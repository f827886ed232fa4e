#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use roadgraph::codec::decode_document;
use roadgraph::reader;
use roadgraph::{
    ApplyOutcome, ChangeDocument, ChangesetId, Database, EngineConfig, EntityId, EntityKind,
    Result, UnknownAttributePolicy,
};
use rusqlite::{Connection, OpenFlags};

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Database::open(&path).expect("initialize database");
    (dir, path)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

pub fn doc(text: &str) -> ChangeDocument {
    decode_document(text, UnknownAttributePolicy::Ignore).expect("document should decode")
}

/// A fresh in-memory database with one open changeset.
pub fn db_with_changeset() -> (Database, ChangesetId) {
    db_with_config(EngineConfig::default())
}

pub fn db_with_config(config: EngineConfig) -> (Database, ChangesetId) {
    let db = Database::open_in_memory_with_config(config).expect("open database");
    let cs = db.open_changeset(99).expect("open changeset");
    (db, cs.id)
}

pub fn apply(db: &mut Database, changeset: ChangesetId, text: &str) -> Result<ApplyOutcome> {
    db.apply_changeset(&doc(text), changeset)
}

/// Server id created for `placeholder`, panicking if there is none.
pub fn created(outcome: &ApplyOutcome, kind: EntityKind, placeholder: i64) -> EntityId {
    let raw = outcome
        .created
        .get(kind, placeholder)
        .unwrap_or_else(|| panic!("no {} created for placeholder {}", kind, placeholder));
    EntityId::from_raw(raw)
}

/// Row count of every table plus the id sequences: equal snapshots mean
/// nothing was written.
pub fn snapshot(conn: &Connection) -> (BTreeMap<&'static str, i64>, BTreeMap<String, i64>) {
    (
        reader::row_counts(conn).expect("row counts"),
        reader::next_ids(conn).expect("next ids"),
    )
}

pub fn count(conn: &Connection, sql: &str, id: i64) -> i64 {
    conn.query_row(sql, [id], |row| row.get(0)).expect("count query")
}

/// Forces the next server id of `kind`.
pub fn set_next_id(conn: &Connection, kind: &str, next: i64) {
    conn.execute(
        "UPDATE id_sequences SET next_id = ?1 WHERE entity = ?2",
        rusqlite::params![next, kind],
    )
    .expect("set next id");
}
