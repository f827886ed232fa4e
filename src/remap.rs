//! # Placeholder Remapping
//!
//! Editors create entities under negative placeholder ids and may reference
//! them elsewhere in the same document. [`IdRemap`] records the server id
//! assigned to each placeholder and resolves references through it.
//!
//! The table lives for exactly one changeset apply. The coordinator creates
//! it, the managers fill and read it, and its contents become the `created`
//! part of the outcome.
//!
//! Placeholders are scoped per entity kind: point `-1` and line `-1` are
//! different entities.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::{EntityId, EntityKind, EntityRef};

/// Transaction-scoped map from `(kind, placeholder)` to server id.
#[derive(Debug, Default)]
pub struct IdRemap {
    entries: HashMap<(EntityKind, i64), EntityId>,
}

impl IdRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the server id assigned to a placeholder.
    ///
    /// # Errors
    ///
    /// `Error::DuplicatePlaceholder` if the placeholder was already recorded
    /// for this kind. The first mapping is kept.
    pub fn record(&mut self, kind: EntityKind, placeholder: i64, id: EntityId) -> Result<()> {
        use std::collections::hash_map::Entry;

        match self.entries.entry((kind, placeholder)) {
            Entry::Occupied(_) => Err(Error::DuplicatePlaceholder { kind, placeholder }),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    /// Turns a reference into a server id.
    ///
    /// Existing ids pass through untouched; they are not checked against
    /// storage here.
    pub fn resolve(&self, kind: EntityKind, reference: EntityRef) -> Result<EntityId> {
        match reference {
            EntityRef::Existing(id) => Ok(id),
            EntityRef::Placeholder(placeholder) => self
                .entries
                .get(&(kind, placeholder))
                .copied()
                .ok_or(Error::UnresolvedReference { kind, placeholder }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every mapping, grouped by kind.
    pub fn created(&self) -> CreatedIds {
        let mut created = CreatedIds::default();
        for (&(kind, placeholder), id) in &self.entries {
            created.of_mut(kind).insert(placeholder, id.as_raw());
        }
        created
    }
}

/// Placeholder → server id mappings, per kind, sorted by placeholder.
///
/// Serializes with the wire names of each kind:
///
/// ```json
/// {"node": {"-2": 11, "-1": 12}, "way": {"-1": 500}, "relation": {}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreatedIds {
    #[serde(rename = "node")]
    pub point: BTreeMap<i64, i64>,
    #[serde(rename = "way")]
    pub line: BTreeMap<i64, i64>,
    #[serde(rename = "relation")]
    pub grouping: BTreeMap<i64, i64>,
}

impl CreatedIds {
    pub fn of(&self, kind: EntityKind) -> &BTreeMap<i64, i64> {
        match kind {
            EntityKind::Point => &self.point,
            EntityKind::Line => &self.line,
            EntityKind::Grouping => &self.grouping,
        }
    }

    fn of_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<i64, i64> {
        match kind {
            EntityKind::Point => &mut self.point,
            EntityKind::Line => &mut self.line,
            EntityKind::Grouping => &mut self.grouping,
        }
    }

    /// Server id created for `placeholder`, if any.
    pub fn get(&self, kind: EntityKind, placeholder: i64) -> Option<i64> {
        self.of(kind).get(&placeholder).copied()
    }

    pub fn total(&self) -> usize {
        self.point.len() + self.line.len() + self.grouping.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
