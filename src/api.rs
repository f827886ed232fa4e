//! # Async API for roadgraph
//!
//! [`RoadGraph`] is the handle an upload service holds. It wraps the
//! synchronous [`Database`] with Tokio channels so request handlers can
//! submit change documents without blocking their runtime.
//!
//! ## The SQLite Challenge
//!
//! `rusqlite::Connection` is `!Sync`, so it cannot be shared across tasks.
//! The connection instead lives on one dedicated OS thread, and every
//! operation is a message to that thread:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Tokio Runtime                            │
//! │                                                             │
//! │   handler1 ─┐                                               │
//! │   handler2 ─┼─ tokio::sync::mpsc ─┐                         │
//! │   handler3 ─┘   (Request + oneshot)│                        │
//! └────────────────────────────────────┼────────────────────────┘
//!                                      ▼
//!                        ┌───────────────────────────┐
//!                        │   roadgraph-writer thread │
//!                        │                           │
//!                        │   Connection + Coordinator│
//!                        │   one changeset at a time │
//!                        └───────────────────────────┘
//! ```
//!
//! Changesets are therefore applied strictly one after another, in the
//! order their requests arrive.
//!
//! ## Cancellation
//!
//! A handler that gives up on an upload drops its future, which drops the
//! oneshot receiver. The writer checks for that right before committing and
//! rolls the transaction back instead, so an abandoned upload never lands.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::changeset::{self, ChangesetSummary};
use crate::codec::{decode_document, ChangeDocument};
use crate::config::EngineConfig;
use crate::coordinator::{ApplyOutcome, Coordinator};
use crate::error::{Error, Result};
use crate::reader::{self, EntityState};
use crate::schema::Database;
use crate::types::{ChangesetId, EntityId, EntityKind};

// =============================================================================
// Configuration
// =============================================================================

/// Size of the request channel.
const REQUEST_CHANNEL_SIZE: usize = 256;

// =============================================================================
// Requests
// =============================================================================

/// Messages handled by the writer thread.
enum Request {
    OpenChangeset {
        user_id: i64,
        response: oneshot::Sender<Result<ChangesetSummary>>,
    },
    LoadChangeset {
        id: ChangesetId,
        response: oneshot::Sender<Result<ChangesetSummary>>,
    },
    Apply {
        document: ChangeDocument,
        changeset: ChangesetId,
        response: oneshot::Sender<Result<ApplyOutcome>>,
    },
    LoadEntity {
        kind: EntityKind,
        id: EntityId,
        response: oneshot::Sender<Result<Option<EntityState>>>,
    },
    Shutdown,
}

// =============================================================================
// RoadGraph - The Main Async Handle
// =============================================================================

/// The main async handle for applying changesets.
///
/// `RoadGraph` is `Clone`, `Send` and `Sync`. All clones talk to the same
/// writer thread.
#[derive(Clone)]
pub struct RoadGraph {
    tx: mpsc::Sender<Request>,
    config: Arc<EngineConfig>,
    writer_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RoadGraph {
    /// Opens or creates a database at `path` with the default config.
    ///
    /// ```rust,ignore
    /// let graph = RoadGraph::open("roads.db").await?;
    /// ```
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, EngineConfig::default()).await
    }

    /// Opens or creates a database at `path`.
    pub async fn open_with_config<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        let db = Database::open_with_config(path, config)?;
        Self::spawn(db)
    }

    /// Opens a private in-memory database. Mostly for tests.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_config(EngineConfig::default()).await
    }

    pub async fn open_in_memory_with_config(config: EngineConfig) -> Result<Self> {
        let db = Database::open_in_memory_with_config(config)?;
        Self::spawn(db)
    }

    fn spawn(db: Database) -> Result<Self> {
        let (conn, config) = db.into_parts();
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let handle = spawn_writer(conn, config.clone(), rx)?;

        Ok(Self {
            tx,
            config: Arc::new(config),
            writer_handle: Arc::new(Mutex::new(Some(handle))),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens a new changeset for `user_id`.
    pub async fn open_changeset(&self, user_id: i64) -> Result<ChangesetSummary> {
        let (response, rx) = oneshot::channel();
        self.send(Request::OpenChangeset { user_id, response }).await?;
        receive(rx).await
    }

    pub async fn load_changeset(&self, id: ChangesetId) -> Result<ChangesetSummary> {
        let (response, rx) = oneshot::channel();
        self.send(Request::LoadChangeset { id, response }).await?;
        receive(rx).await
    }

    /// Applies a decoded document under `changeset`.
    ///
    /// Dropping the returned future before it resolves cancels the apply if
    /// it has not committed yet.
    pub async fn apply(
        &self,
        document: ChangeDocument,
        changeset: ChangesetId,
    ) -> Result<ApplyOutcome> {
        let (response, rx) = oneshot::channel();
        self.send(Request::Apply {
            document,
            changeset,
            response,
        })
        .await?;
        receive(rx).await
    }

    /// Decodes `text` with the configured attribute policy, then applies it.
    ///
    /// Decoding happens on the calling task, so malformed documents never
    /// reach the writer thread.
    pub async fn apply_json(&self, text: &str, changeset: ChangesetId) -> Result<ApplyOutcome> {
        let document = decode_document(text, self.config.unknown_attributes)?;
        self.apply(document, changeset).await
    }

    /// Current state of one entity, or `None` if the id was never used.
    pub async fn load_entity(&self, kind: EntityKind, id: EntityId) -> Result<Option<EntityState>> {
        let (response, rx) = oneshot::channel();
        self.send(Request::LoadEntity { kind, id, response }).await?;
        receive(rx).await
    }

    /// Stops the writer thread after it drains queued requests.
    ///
    /// Every clone fails with [`Error::Schema`] afterwards.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Request::Shutdown).await;

        if let Some(handle) = self.writer_handle.lock().await.take() {
            let _ = handle.join();
        }
    }

    async fn send(&self, request: Request) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| Error::Schema("writer has shut down".to_string()))
    }
}

async fn receive<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    rx.await
        .map_err(|_| Error::Schema("writer dropped response".to_string()))?
}

// =============================================================================
// Writer Thread
// =============================================================================

fn spawn_writer(
    conn: Connection,
    config: EngineConfig,
    rx: mpsc::Receiver<Request>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("roadgraph-writer".to_string())
        .spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(run_writer(conn, config, rx)),
                // Dropping `rx` here fails every pending and future request.
                Err(e) => error!(error = %e, "failed to create writer runtime"),
            }
        })
        .map_err(|e| Error::Schema(format!("failed to spawn writer thread: {}", e)))
}

async fn run_writer(mut conn: Connection, config: EngineConfig, mut rx: mpsc::Receiver<Request>) {
    let coordinator = Coordinator::new(&config);

    while let Some(request) = rx.recv().await {
        match request {
            Request::OpenChangeset { user_id, response } => {
                let _ = response.send(changeset::open_changeset(&conn, user_id));
            }
            Request::LoadChangeset { id, response } => {
                let _ = response.send(changeset::load_changeset(&conn, id));
            }
            Request::Apply {
                document,
                changeset,
                response,
            } => {
                if response.is_closed() {
                    warn!(changeset = %changeset, "upload abandoned before apply started");
                    continue;
                }
                let result = coordinator.apply_changeset_with(&mut conn, &document, changeset, || {
                    !response.is_closed()
                });
                let _ = response.send(result);
            }
            Request::LoadEntity { kind, id, response } => {
                let _ = response.send(reader::load_entity(&conn, kind, id));
            }
            Request::Shutdown => break,
        }
    }

    debug!("writer thread exiting");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_document;
    use crate::config::UnknownAttributePolicy;

    async fn test_graph() -> (RoadGraph, tempfile::TempDir) {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let graph = RoadGraph::open(temp_dir.path().join("test.db")).await.unwrap();
        (graph, temp_dir)
    }

    #[tokio::test]
    async fn test_open() {
        let (graph, _temp_dir) = test_graph().await;
        graph.shutdown().await;
    }

    #[tokio::test]
    async fn test_apply_json() {
        let (graph, _temp_dir) = test_graph().await;
        let cs = graph.open_changeset(99).await.unwrap();

        let outcome = graph
            .apply_json(
                r#"{"create": {"node": {"id": -1, "lat": 51.5, "lon": -0.12,
                    "tag": {"k": "amenity", "v": "cafe"}}}}"#,
                cs.id,
            )
            .await
            .unwrap();

        let id = EntityId::from_raw(outcome.created.get(EntityKind::Point, -1).unwrap());
        let state = graph.load_entity(EntityKind::Point, id).await.unwrap().unwrap();
        assert!(state.meta().visible);
        assert_eq!(state.meta().changeset, cs.id);

        graph.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_document_never_reaches_writer() {
        let graph = RoadGraph::open_in_memory().await.unwrap();
        let cs = graph.open_changeset(1).await.unwrap();

        let err = graph.apply_json("{not json", cs.id).await.unwrap_err();
        assert!(matches!(err, Error::DocumentParse { .. }));
        assert_eq!(graph.load_changeset(cs.id).await.unwrap().num_changes, 0);

        graph.shutdown().await;
    }

    #[tokio::test]
    async fn test_clones_share_writer() {
        let graph = RoadGraph::open_in_memory().await.unwrap();
        let other = graph.clone();

        let cs = graph.open_changeset(7).await.unwrap();
        let loaded = other.load_changeset(cs.id).await.unwrap();
        assert_eq!(loaded.user_id, 7);

        graph.shutdown().await;
        assert!(other.open_changeset(7).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_caller_rolls_back() {
        let (conn, config) = Database::open_in_memory().unwrap().into_parts();
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_writer(conn, config, rx).unwrap();

        let (response, cs_rx) = oneshot::channel();
        tx.send(Request::OpenChangeset { user_id: 1, response }).await.unwrap();
        let cs = cs_rx.await.unwrap().unwrap();

        let document = decode_document(
            r#"{"create": {"node": {"id": -1, "lat": 0, "lon": 0}}}"#,
            UnknownAttributePolicy::Ignore,
        )
        .unwrap();

        // The caller is gone before the writer sees the request.
        let (response, abandoned) = oneshot::channel();
        drop(abandoned);
        tx.send(Request::Apply {
            document,
            changeset: cs.id,
            response,
        })
        .await
        .unwrap();

        let (response, cs_rx) = oneshot::channel();
        tx.send(Request::LoadChangeset { id: cs.id, response }).await.unwrap();
        assert_eq!(cs_rx.await.unwrap().unwrap().num_changes, 0);

        let (response, entity_rx) = oneshot::channel();
        tx.send(Request::LoadEntity {
            kind: EntityKind::Point,
            id: EntityId::from_raw(1),
            response,
        })
        .await
        .unwrap();
        assert!(entity_rx.await.unwrap().unwrap().is_none());

        tx.send(Request::Shutdown).await.unwrap();
        handle.join().unwrap();
    }
}
