//! # roadgraph - Versioned Road-Network Store
//!
//! roadgraph stores a road network as three kinds of versioned entities and
//! applies uploaded change documents to it atomically:
//!
//! - **Points** (`node`): a coordinate plus tags
//! - **Lines** (`way`): an ordered list of points plus tags
//! - **Groupings** (`relation`): typed, role-labelled members plus tags
//!
//! Every edit bumps the entity's version and appends an immutable history
//! row. Deletes are soft: the current row stays, marked invisible.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Async API Layer                          │
//! │         (RoadGraph: open_changeset, apply, load_entity)         │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │  mpsc + oneshot
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Writer Thread / Coordinator                    │
//! │            (one transaction per changeset, owns IdRemap)        │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────────┐ │
//! │  │   Entity    │  │    Bulk     │  │  Changeset bookkeeping   │ │
//! │  │  Managers   │──│   Writer    │  │  (bbox, num_changes)     │ │
//! │  └─────────────┘  └─────────────┘  └──────────────────────────┘ │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            SQLite                               │
//! │            (current_* tables, history tables, WAL)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **All or nothing**: a changeset either commits completely or leaves
//!    storage exactly as it was
//! 2. **Monotonic versions**: every edit of an entity stores a strictly
//!    larger version, and history keeps every one
//! 3. **Stable ids**: server ids come from a persistent per-kind sequence
//!    and no two committed entities of a kind share one
//! 4. **Resolved references**: no stored line or grouping points at a
//!    placeholder id
//!
//! ## Module Organization
//!
//! - [`error`]: The error enum shared by every layer
//! - [`config`]: Engine configuration and policies
//! - [`types`]: Domain types (EntityId, Coordinate, BoundingBox, etc.)
//! - [`schema`]: SQLite DDL and database initialization
//! - [`codec`]: Change document decoding
//! - [`remap`]: Placeholder to server id table
//! - [`writer`]: Chunked multi-row inserts
//! - [`managers`]: Per-kind create / modify / delete
//! - [`changeset`]: Changeset rows and their bookkeeping
//! - [`coordinator`]: The transaction that applies one document
//! - [`reader`]: Current-state read-back
//! - [`api`]: Async API (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for roadgraph operations.
///
/// One enum covers document, state, storage and lifecycle failures, so
/// callers match on a single type.
pub mod error;

/// Engine configuration: batch sizes, version policy, attribute policy.
pub mod config;

/// Domain types.
///
/// Newtypes for ids and versions, fixed-point coordinates and bounding
/// boxes.
pub mod types;

/// SQLite schema definitions and database initialization.
pub mod schema;

/// Change document decoding.
///
/// Turns an osmChange document (JSON form) into typed create, modify and
/// delete blocks. All structural validation happens here, before storage
/// is touched.
pub mod codec;

/// Placeholder id mapping for one changeset.
pub mod remap;

/// Chunked bulk inserts.
///
/// Splits row sets so every statement stays under the configured parameter
/// limit, and allocates server ids in contiguous blocks.
pub mod writer;

/// Entity managers, one per entity kind.
pub mod managers;

/// Changeset rows: open, load, and widen after an apply.
pub mod changeset;

/// Applies one change document inside one transaction.
pub mod coordinator;

/// Read operations over committed state.
pub mod reader;

/// Async API for roadgraph.
///
/// The main entry point is [`RoadGraph`](api::RoadGraph).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::RoadGraph;
pub use changeset::ChangesetSummary;
pub use codec::{decode_document, ChangeDocument};
pub use config::{EngineConfig, UnknownAttributePolicy, VersionPolicy};
pub use coordinator::{ApplyOutcome, Coordinator};
pub use error::{Error, Result};
pub use remap::{CreatedIds, IdRemap};
pub use schema::Database;

pub use types::{
    Action, BoundingBox, ChangesetId, Coordinate, EntityId, EntityKind, EntityRef, Tag, Version,
};
