//! # SQLite Schema for the Road Graph
//!
//! This module defines the database schema and handles initialization.
//!
//! ## Table Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                             Schema Overview                              │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  changesets ◄──────────── current_nodes ◄──── current_way_nodes          │
//! │  ┌────────────┐           ┌─────────────┐     ┌──────────────┐           │
//! │  │ id (PK)    │           │ id (PK)     │     │ way_id (FK)  │──┐        │
//! │  │ user_id    │           │ latitude    │     │ node_id (FK) │  │        │
//! │  │ bbox       │           │ longitude   │     │ sequence_id  │  │        │
//! │  │ num_changes│           │ version ... │     └──────────────┘  │        │
//! │  └────────────┘           └─────────────┘                       ▼        │
//! │        ▲                                              current_ways       │
//! │        └──────────── current_relations ◄── current_relation_members      │
//! │                                                                          │
//! │  current_*_tags: (owner_id, k, v), one key per owner                     │
//! │  history: nodes, ways, relations (+ tags, refs, members) keyed by        │
//! │           (id, version), append-only                                     │
//! │  id_sequences: next server id per entity kind                            │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### Current vs history tables
//!
//! `current_*` tables hold only the latest version of each entity and are
//! what readers query. The history tables receive one row set per version
//! and are never updated; their `(id, version)` primary key turns any attempt
//! to rewrite a committed version into an integrity error.
//!
//! ### Why an explicit id sequence?
//!
//! A changeset inserts many rows per statement and must know which generated
//! id belongs to which input row. Allocating a contiguous block from
//! `id_sequences` before the insert makes that correspondence hold by
//! construction instead of depending on the order rows come back in.
//!
//! ### Soft delete
//!
//! Deleting an entity flips `visible` and strips its dependent rows; the
//! current row itself is never removed, so line references to a deleted
//! point still satisfy their foreign key.

use std::path::Path;

use rusqlite::Connection;

use crate::changeset::{self, ChangesetSummary};
use crate::codec::ChangeDocument;
use crate::config::EngineConfig;
use crate::coordinator::{ApplyOutcome, Coordinator};
use crate::error::{Error, Result};
use crate::types::ChangesetId;

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS roadgraph_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// Edit sessions. Bounding box columns stay NULL until the first changeset
/// touching a point is applied.
const CREATE_CHANGESETS: &str = r#"
CREATE TABLE IF NOT EXISTS changesets (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,
    created_at  INTEGER NOT NULL,
    closed_at   INTEGER NOT NULL,
    min_lat     INTEGER,
    max_lat     INTEGER,
    min_lon     INTEGER,
    max_lon     INTEGER,
    num_changes INTEGER NOT NULL DEFAULT 0
)
"#;

/// Next id to hand out per entity kind (`node`, `way`, `relation`).
const CREATE_ID_SEQUENCES: &str = r#"
CREATE TABLE IF NOT EXISTS id_sequences (
    entity  TEXT PRIMARY KEY,
    next_id INTEGER NOT NULL
);
INSERT OR IGNORE INTO id_sequences (entity, next_id) VALUES ('node', 1);
INSERT OR IGNORE INTO id_sequences (entity, next_id) VALUES ('way', 1);
INSERT OR IGNORE INTO id_sequences (entity, next_id) VALUES ('relation', 1);
"#;

/// Points. `tile` is the quadtile of the coordinate (see
/// [`Coordinate::tile`](crate::types::Coordinate::tile)).
const CREATE_CURRENT_NODES: &str = r#"
CREATE TABLE IF NOT EXISTS current_nodes (
    id           INTEGER PRIMARY KEY,
    latitude     INTEGER NOT NULL,
    longitude    INTEGER NOT NULL,
    changeset_id INTEGER NOT NULL REFERENCES changesets(id),
    visible      INTEGER NOT NULL,
    timestamp    INTEGER NOT NULL,
    tile         INTEGER NOT NULL,
    version      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS current_nodes_tile ON current_nodes(tile);
CREATE TABLE IF NOT EXISTS current_node_tags (
    node_id INTEGER NOT NULL REFERENCES current_nodes(id),
    k       TEXT NOT NULL DEFAULT '',
    v       TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (node_id, k)
);
"#;

/// Lines and their ordered point references.
const CREATE_CURRENT_WAYS: &str = r#"
CREATE TABLE IF NOT EXISTS current_ways (
    id           INTEGER PRIMARY KEY,
    changeset_id INTEGER NOT NULL REFERENCES changesets(id),
    timestamp    INTEGER NOT NULL,
    visible      INTEGER NOT NULL,
    version      INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS current_way_nodes (
    way_id      INTEGER NOT NULL REFERENCES current_ways(id),
    node_id     INTEGER NOT NULL REFERENCES current_nodes(id),
    sequence_id INTEGER NOT NULL,
    PRIMARY KEY (way_id, sequence_id)
);
CREATE INDEX IF NOT EXISTS current_way_nodes_node ON current_way_nodes(node_id);
CREATE TABLE IF NOT EXISTS current_way_tags (
    way_id INTEGER NOT NULL REFERENCES current_ways(id),
    k      TEXT NOT NULL DEFAULT '',
    v      TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (way_id, k)
);
"#;

/// Groupings and their typed members. `member_id` is polymorphic, so it has
/// no foreign key; cycles are not checked.
const CREATE_CURRENT_RELATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS current_relations (
    id           INTEGER PRIMARY KEY,
    changeset_id INTEGER NOT NULL REFERENCES changesets(id),
    timestamp    INTEGER NOT NULL,
    visible      INTEGER NOT NULL,
    version      INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS current_relation_members (
    relation_id INTEGER NOT NULL REFERENCES current_relations(id),
    member_type TEXT NOT NULL CHECK (member_type IN ('Node', 'Way', 'Relation')),
    member_id   INTEGER NOT NULL,
    member_role TEXT NOT NULL DEFAULT '',
    sequence_id INTEGER NOT NULL,
    PRIMARY KEY (relation_id, sequence_id)
);
CREATE INDEX IF NOT EXISTS current_relation_members_member
ON current_relation_members(member_type, member_id);
CREATE TABLE IF NOT EXISTS current_relation_tags (
    relation_id INTEGER NOT NULL REFERENCES current_relations(id),
    k           TEXT NOT NULL DEFAULT '',
    v           TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (relation_id, k)
);
"#;

/// Append-only version history.
const CREATE_HISTORY: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    node_id      INTEGER NOT NULL,
    version      INTEGER NOT NULL,
    latitude     INTEGER NOT NULL,
    longitude    INTEGER NOT NULL,
    changeset_id INTEGER NOT NULL REFERENCES changesets(id),
    visible      INTEGER NOT NULL,
    timestamp    INTEGER NOT NULL,
    tile         INTEGER NOT NULL,
    PRIMARY KEY (node_id, version)
);
CREATE TABLE IF NOT EXISTS node_tags (
    node_id INTEGER NOT NULL,
    version INTEGER NOT NULL,
    k       TEXT NOT NULL DEFAULT '',
    v       TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (node_id, version, k)
);
CREATE TABLE IF NOT EXISTS ways (
    way_id       INTEGER NOT NULL,
    version      INTEGER NOT NULL,
    changeset_id INTEGER NOT NULL REFERENCES changesets(id),
    timestamp    INTEGER NOT NULL,
    visible      INTEGER NOT NULL,
    PRIMARY KEY (way_id, version)
);
CREATE TABLE IF NOT EXISTS way_nodes (
    way_id      INTEGER NOT NULL,
    version     INTEGER NOT NULL,
    node_id     INTEGER NOT NULL,
    sequence_id INTEGER NOT NULL,
    PRIMARY KEY (way_id, version, sequence_id)
);
CREATE TABLE IF NOT EXISTS way_tags (
    way_id  INTEGER NOT NULL,
    version INTEGER NOT NULL,
    k       TEXT NOT NULL DEFAULT '',
    v       TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (way_id, version, k)
);
CREATE TABLE IF NOT EXISTS relations (
    relation_id  INTEGER NOT NULL,
    version      INTEGER NOT NULL,
    changeset_id INTEGER NOT NULL REFERENCES changesets(id),
    timestamp    INTEGER NOT NULL,
    visible      INTEGER NOT NULL,
    PRIMARY KEY (relation_id, version)
);
CREATE TABLE IF NOT EXISTS relation_members (
    relation_id INTEGER NOT NULL,
    version     INTEGER NOT NULL,
    member_type TEXT NOT NULL,
    member_id   INTEGER NOT NULL,
    member_role TEXT NOT NULL DEFAULT '',
    sequence_id INTEGER NOT NULL,
    PRIMARY KEY (relation_id, version, sequence_id)
);
CREATE TABLE IF NOT EXISTS relation_tags (
    relation_id INTEGER NOT NULL,
    version     INTEGER NOT NULL,
    k           TEXT NOT NULL DEFAULT '',
    v           TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (relation_id, version, k)
);
"#;

/// Every table the engine writes, for diagnostics and tests.
pub const ENTITY_TABLES: [&str; 20] = [
    "changesets",
    "id_sequences",
    "current_nodes",
    "current_node_tags",
    "current_ways",
    "current_way_nodes",
    "current_way_tags",
    "current_relations",
    "current_relation_members",
    "current_relation_tags",
    "nodes",
    "node_tags",
    "ways",
    "way_nodes",
    "way_tags",
    "relations",
    "relation_members",
    "relation_tags",
    "roadgraph_metadata",
    "sqlite_sequence",
];

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the road-graph schema and an engine config.
///
/// `Database` owns its `Connection`; dropping it closes the connection.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    config: EngineConfig,
}

impl Database {
    /// Opens a database file with the default config, creating and
    /// initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use roadgraph::Database;
    ///
    /// let db = Database::open("roads.db")?;
    /// # Ok::<(), roadgraph::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, EngineConfig::default())
    }

    /// Opens a database file with an explicit config.
    pub fn open_with_config(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let conn = Connection::open(path)?;
        let mut db = Self { conn, config };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database for testing.
    ///
    /// ```rust
    /// use roadgraph::Database;
    ///
    /// let db = Database::open_in_memory()?;
    /// # Ok::<(), roadgraph::Error>(())
    /// ```
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_config(EngineConfig::default())
    }

    pub fn open_in_memory_with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn, config };
        db.initialize()?;
        Ok(db)
    }

    /// Sets pragmas, creates all tables and verifies the schema version.
    fn initialize(&mut self) -> Result<()> {
        // WAL: readers see a consistent snapshot while a changeset is applied.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        // Foreign keys carry the changeset and point-reference constraints.
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;
        self.conn.busy_timeout(self.config.busy_timeout())?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_CHANGESETS)?;
        self.conn.execute_batch(CREATE_ID_SEQUENCES)?;
        self.conn.execute_batch(CREATE_CURRENT_NODES)?;
        self.conn.execute_batch(CREATE_CURRENT_WAYS)?;
        self.conn.execute_batch(CREATE_CURRENT_RELATIONS)?;
        self.conn.execute_batch(CREATE_HISTORY)?;

        self.verify_or_set_version()?;

        Ok(())
    }

    /// Verifies the schema version, or sets it if this is a new database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<i32> = self
            .conn
            .query_row(
                "SELECT value FROM roadgraph_metadata WHERE key = 'schema_version'",
                [],
                |row| {
                    let s: String = row.get(0)?;
                    Ok(s.parse().unwrap_or(0))
                },
            )
            .ok();

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO roadgraph_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, but this build requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    // =========================================================================
    // Changeset Operations
    // =========================================================================

    /// Opens a new changeset for `user_id`.
    pub fn open_changeset(&self, user_id: i64) -> Result<ChangesetSummary> {
        changeset::open_changeset(&self.conn, user_id)
    }

    /// Loads a changeset summary.
    pub fn load_changeset(&self, id: ChangesetId) -> Result<ChangesetSummary> {
        changeset::load_changeset(&self.conn, id)
    }

    /// Applies a decoded change document atomically under `changeset`.
    pub fn apply_changeset(
        &mut self,
        document: &ChangeDocument,
        changeset: ChangesetId,
    ) -> Result<ApplyOutcome> {
        Coordinator::new(&self.config).apply_changeset(&mut self.conn, document, changeset)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the underlying connection for read-back queries.
    ///
    /// Callers must not modify the schema or write entity tables directly.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns the underlying connection mutably (needed to open transactions).
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Consumes the wrapper, returning the connection (for the writer thread).
    pub fn into_parts(self) -> (Connection, EngineConfig) {
        (self.conn, self.config)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user_tables(db: &Database) -> Vec<String> {
        let mut stmt = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .expect("should prepare");

        stmt.query_map([], |row| row.get(0))
            .expect("should query")
            .collect::<std::result::Result<Vec<_>, _>>()
            .expect("should collect")
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().expect("should create in-memory db");
        let tables = user_tables(&db);

        // metadata, changesets, id_sequences, 8 current tables, 8 history tables
        assert_eq!(tables.len(), 19, "unexpected tables: {:?}", tables);
        assert!(tables.contains(&"current_way_nodes".to_string()));
        assert!(tables.contains(&"relation_members".to_string()));
    }

    #[test]
    fn test_id_sequences_seeded() {
        let db = Database::open_in_memory().expect("should create db");

        let next: Vec<(String, i64)> = {
            let mut stmt = db
                .conn
                .prepare("SELECT entity, next_id FROM id_sequences ORDER BY entity")
                .unwrap();
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .unwrap()
                .collect::<std::result::Result<Vec<_>, _>>()
                .unwrap()
        };

        assert_eq!(
            next,
            vec![
                ("node".to_string(), 1),
                ("relation".to_string(), 1),
                ("way".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::open_in_memory().expect("should create db");
        let enabled: i64 = db
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_schema_version_stored() {
        let db = Database::open_in_memory().expect("should create db");

        let version: String = db
            .conn
            .query_row(
                "SELECT value FROM roadgraph_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .expect("should query version");

        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn test_double_initialization() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("test.db");

        {
            let db = Database::open(&path).expect("first open should work");
            db.open_changeset(1).expect("should open changeset");
        }

        {
            let db = Database::open(&path).expect("second open should work");
            assert_eq!(user_tables(&db).len(), 19);

            // Re-running the seed must not reset the sequences or drop rows.
            let changesets: i64 = db
                .conn
                .query_row("SELECT COUNT(*) FROM changesets", [], |row| row.get(0))
                .unwrap();
            assert_eq!(changesets, 1);
        }
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("old.db");

        {
            let db = Database::open(&path).unwrap();
            db.conn
                .execute(
                    "UPDATE roadgraph_metadata SET value = '99' WHERE key = 'schema_version'",
                    [],
                )
                .unwrap();
        }

        let err = Database::open(&path).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
