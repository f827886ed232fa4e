//! # Domain Types for the Road Graph
//!
//! This module defines the core types used throughout the engine: entity
//! kinds, identifiers, versions, coordinates, tags and bounding boxes.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! Server ids, changeset ids and versions are all integers on disk. Wrapping
//! each in its own single-field struct means a `ChangesetId` can never be
//! passed where an `EntityId` is expected:
//!
//! ```rust
//! use roadgraph::types::{ChangesetId, EntityId};
//!
//! fn example(entity: EntityId, changeset: ChangesetId) {
//!     // entity == changeset  // Won't compile
//! }
//! ```
//!
//! ## Placeholder vs Existing References
//!
//! Editors name not-yet-created entities with negative integers. That
//! convention stops at the codec: from there on a reference is an
//! [`EntityRef`], either `Placeholder(n)` or `Existing(id)`, and it is turned
//! into a server id exactly once, by the [`IdRemap`](crate::remap::IdRemap).
//!
//! ## Invariants
//!
//! - [`EntityId`]: positive, assigned by the server, never reused
//! - [`Version`]: starts at 1, strictly increases per entity
//! - [`Coordinate`]: fixed-point degrees × 10^7, range-checked on construction

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

// =============================================================================
// Entity Kinds and Actions
// =============================================================================

/// The three versioned entity types.
///
/// Rust names follow the road-network vocabulary; the wire and storage names
/// follow the OSM 0.6 vocabulary the editors speak (`node`, `way`,
/// `relation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EntityKind {
    /// A single coordinate (`node`).
    Point,
    /// An ordered sequence of points (`way`).
    Line,
    /// A role-labeled collection of other entities (`relation`).
    Grouping,
}

impl EntityKind {
    /// Processing order inside one action: points before lines before
    /// groupings, the natural direction of references.
    pub const ALL: [EntityKind; 3] = [EntityKind::Point, EntityKind::Line, EntityKind::Grouping];

    /// Element name in a change document.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EntityKind::Point => "node",
            EntityKind::Line => "way",
            EntityKind::Grouping => "relation",
        }
    }

    /// Value stored in the `member_type` column of membership tables.
    pub fn member_type(&self) -> &'static str {
        match self {
            EntityKind::Point => "Node",
            EntityKind::Line => "Way",
            EntityKind::Grouping => "Relation",
        }
    }

    /// Key used in the `id_sequences` table.
    pub(crate) fn sequence_name(&self) -> &'static str {
        self.wire_name()
    }

    /// Parses a member type as written by editors (`node`, `Way`, ...).
    pub fn from_member_type(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "node" => Some(EntityKind::Point),
            "way" => Some(EntityKind::Line),
            "relation" => Some(EntityKind::Grouping),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// The three blocks of a change document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Modify,
    Delete,
}

impl Action {
    /// Fixed application order. Creates run first so later blocks can see the
    /// new entities; deletes run last so a modify is never starved of rows.
    pub const ALL: [Action; 3] = [Action::Create, Action::Modify, Action::Delete];

    pub fn wire_name(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Modify => "modify",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// A permanent, server-assigned entity id.
///
/// Ids are allocated per entity kind from the `id_sequences` table, so a
/// point and a line may share the same numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    /// Creates an id from a raw value.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not positive. Use [`EntityId::from_raw_unchecked`]
    /// when reading from the database.
    pub fn from_raw(value: i64) -> Self {
        assert!(value > 0, "EntityId must be positive");
        Self(value)
    }

    /// Creates an id without the positivity check (trusted database values).
    pub fn from_raw_unchecked(value: i64) -> Self {
        Self(value)
    }

    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to an entity as written in a change document.
///
/// # Rust Pattern: Tagged Variants Instead of Sign Checks
///
/// The wire protocol encodes "not yet created" as a negative id. Carrying
/// that as an enum means the only place that ever looks at the sign is the
/// codec; everything downstream matches on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// A client-chosen local id, valid only inside one document.
    Placeholder(i64),
    /// A server id that already exists in storage.
    Existing(EntityId),
}

impl EntityRef {
    /// Classifies a raw wire id. Zero is not a valid id in either space.
    pub fn from_wire(raw: i64) -> Option<Self> {
        match raw {
            0 => None,
            n if n < 0 => Some(EntityRef::Placeholder(n)),
            n => Some(EntityRef::Existing(EntityId::from_raw(n))),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Placeholder(n) => write!(f, "placeholder {}", n),
            EntityRef::Existing(id) => write!(f, "{}", id),
        }
    }
}

/// Identifier of a changeset (edit session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ChangesetId(i64);

impl ChangesetId {
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ChangesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A per-entity version number.
///
/// # Invariants
///
/// - Starts at 1 when the entity is created
/// - Every modify and the final delete produce the next version
/// - (id, version) is immutable once committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly created entity.
    pub const FIRST: Version = Version(1);

    /// Largest version a `version` column can hold.
    pub const MAX: Version = Version(i64::MAX as u64);

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// The following version, or `None` past [`Version::MAX`].
    pub fn next(&self) -> Option<Self> {
        (self.0 < Self::MAX.0).then(|| Self(self.0 + 1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Coordinates
// =============================================================================

/// Scale between decimal degrees and the stored fixed-point integers.
pub const COORDINATE_SCALE: f64 = 10_000_000.0;

/// A latitude/longitude pair in fixed-point degrees × 10^7.
///
/// # Why Fixed Point?
///
/// Seven decimal places is roughly one centimetre, more than any survey
/// needs, and integers compare exactly. `180 × 10^7` still fits in an `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Coordinate {
    pub lat: i32,
    pub lon: i32,
}

impl Coordinate {
    /// Converts decimal degrees, returning `None` outside the valid range
    /// (latitude ±90, longitude ±180) or for non-finite input.
    pub fn from_degrees(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self {
            lat: (lat * COORDINATE_SCALE).round() as i32,
            lon: (lon * COORDINATE_SCALE).round() as i32,
        })
    }

    /// Creates a coordinate from stored fixed-point values.
    pub fn from_fixed(lat: i32, lon: i32) -> Self {
        Self { lat, lon }
    }

    pub fn lat_degrees(&self) -> f64 {
        self.lat as f64 / COORDINATE_SCALE
    }

    pub fn lon_degrees(&self) -> f64 {
        self.lon as f64 / COORDINATE_SCALE
    }

    /// Quadtile index for the `tile` column.
    ///
    /// Longitude and latitude are each scaled to 16 bits and their bits are
    /// interleaved (x first), giving a 32-bit Morton code where nearby points
    /// share prefixes.
    pub fn tile(&self) -> u32 {
        let x = ((self.lon_degrees() + 180.0) * 65535.0 / 360.0).round() as u32;
        let y = ((self.lat_degrees() + 90.0) * 65535.0 / 180.0).round() as u32;

        let mut tile = 0u32;
        for bit in (0..16).rev() {
            tile = (tile << 1) | ((x >> bit) & 1);
            tile = (tile << 1) | ((y >> bit) & 1);
        }
        tile
    }
}

// =============================================================================
// Tags
// =============================================================================

/// A key/value tag. Keys are unique per entity version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Tag {
    #[serde(rename = "k")]
    pub key: String,
    #[serde(rename = "v")]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// Bounding Box
// =============================================================================

/// Axis-aligned bounds of every coordinate touched by a changeset.
///
/// Stored in the same fixed-point units as [`Coordinate`]. The box only ever
/// widens: [`BoundingBox::include`] never shrinks an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub min_lat: i32,
    pub max_lat: i32,
    pub min_lon: i32,
    pub max_lon: i32,
}

impl BoundingBox {
    /// A degenerate box around one coordinate.
    pub fn around(coord: Coordinate) -> Self {
        Self {
            min_lat: coord.lat,
            max_lat: coord.lat,
            min_lon: coord.lon,
            max_lon: coord.lon,
        }
    }

    /// Smallest box containing every coordinate, or `None` for no input.
    pub fn from_coordinates<'a>(coords: impl IntoIterator<Item = &'a Coordinate>) -> Option<Self> {
        let mut iter = coords.into_iter();
        let first = iter.next()?;
        let mut bbox = Self::around(*first);
        for coord in iter {
            bbox.include(*coord);
        }
        Some(bbox)
    }

    /// Widens the box to contain `coord`.
    pub fn include(&mut self, coord: Coordinate) {
        self.min_lat = self.min_lat.min(coord.lat);
        self.max_lat = self.max_lat.max(coord.lat);
        self.min_lon = self.min_lon.min(coord.lon);
        self.max_lon = self.max_lon.max(coord.lon);
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    pub fn contains(&self, coord: Coordinate) -> bool {
        (self.min_lat..=self.max_lat).contains(&coord.lat)
            && (self.min_lon..=self.max_lon).contains(&coord.lon)
    }

    /// True if `other` lies entirely inside this box.
    pub fn covers(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.min_lat
            && self.max_lat >= other.max_lat
            && self.min_lon <= other.min_lon
            && self.max_lon >= other.max_lon
    }
}

// =============================================================================
// Time
// =============================================================================

/// Returns the current Unix time in milliseconds.
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
