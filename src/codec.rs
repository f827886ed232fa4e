//! # Change Document Decoding
//!
//! This module turns a change document into normalized records grouped by
//! action and entity kind. It does not touch storage and does not resolve
//! cross-references; its only job is to make sure that everything handed to
//! the coordinator is structurally sound.
//!
//! ## Document Format
//!
//! The JSON rendering of an `osmChange` document:
//!
//! ```text
//! {
//!   "create": { "node": [...], "way": [...], "relation": [...] },
//!   "modify": { ... },
//!   "delete": { ... }
//! }
//! ```
//!
//! XML-to-JSON converters are loose about shape, so the decoder accepts:
//!
//! - an optional top-level `osmChange` wrapper
//! - a single object wherever a list is expected
//! - several blocks for one action (an array of blocks), concatenated in order
//! - numbers written as strings (`"lat": "10.5"`, `"id": "-1"`)
//!
//! ## Attribute Schema
//!
//! Every attribute the decoder understands is listed in [`field_for`]. An
//! attribute missing from that table is either skipped or rejected depending
//! on [`UnknownAttributePolicy`].
//!
//! ## Validation
//!
//! - `create` ids must be placeholders (negative), unique per kind
//! - `modify` and `delete` ids must be positive
//! - `create` and `modify` nodes need an in-range `lat`/`lon`
//! - tag keys are unique per element

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::UnknownAttributePolicy;
use crate::error::{Error, Result};
use crate::types::{Action, ChangesetId, Coordinate, EntityKind, EntityRef, Tag, Version};

// =============================================================================
// Decoded Records
// =============================================================================

/// Attributes shared by all three entity kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementMeta {
    /// Placeholder in `create`, existing id in `modify`/`delete`.
    pub id: EntityRef,
    /// Declared base version, if the editor sent one.
    pub version: Option<Version>,
    /// Declared owning changeset. `None` means the session changeset.
    pub changeset: Option<ChangesetId>,
    /// Honoured on create only.
    pub visible: bool,
    pub tags: Vec<Tag>,
}

/// A decoded `node` element.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub meta: ElementMeta,
    /// Required for create and modify, optional for delete.
    pub coordinate: Option<Coordinate>,
}

/// A decoded `way` element.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord {
    pub meta: ElementMeta,
    /// Ordered point references (`nd`).
    pub nodes: Vec<EntityRef>,
}

/// One typed, role-labeled member of a grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub kind: EntityKind,
    pub reference: EntityRef,
    pub role: String,
}

/// A decoded `relation` element.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingRecord {
    pub meta: ElementMeta,
    pub members: Vec<Member>,
}

/// Everything one action does, split by entity kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBlock {
    pub points: Vec<PointRecord>,
    pub lines: Vec<LineRecord>,
    pub groupings: Vec<GroupingRecord>,
}

impl ChangeBlock {
    /// Number of elements of `kind` in this block.
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Point => self.points.len(),
            EntityKind::Line => self.lines.len(),
            EntityKind::Grouping => self.groupings.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len() + self.lines.len() + self.groupings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fully decoded change document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeDocument {
    pub create: ChangeBlock,
    pub modify: ChangeBlock,
    pub delete: ChangeBlock,
}

impl ChangeDocument {
    pub fn block(&self, action: Action) -> &ChangeBlock {
        match action {
            Action::Create => &self.create,
            Action::Modify => &self.modify,
            Action::Delete => &self.delete,
        }
    }

    fn block_mut(&mut self, action: Action) -> &mut ChangeBlock {
        match action {
            Action::Create => &mut self.create,
            Action::Modify => &mut self.modify,
            Action::Delete => &mut self.delete,
        }
    }

    /// Total number of elements across all blocks.
    pub fn len(&self) -> usize {
        self.create.len() + self.modify.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Attribute Schema
// =============================================================================

/// Target of a recognized element attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Version,
    Changeset,
    Visible,
    Latitude,
    Longitude,
    Tags,
    NodeRefs,
    Members,
    /// Recognized but assigned by the server (`timestamp`, `user`, `uid`).
    ServerAssigned,
}

/// The attribute table: which attributes each element kind understands.
pub fn field_for(kind: EntityKind, name: &str) -> Option<Field> {
    let common = match name {
        "id" => Some(Field::Id),
        "version" => Some(Field::Version),
        "changeset" => Some(Field::Changeset),
        "visible" => Some(Field::Visible),
        "tag" => Some(Field::Tags),
        "timestamp" | "user" | "uid" => Some(Field::ServerAssigned),
        _ => None,
    };
    if common.is_some() {
        return common;
    }

    match (kind, name) {
        (EntityKind::Point, "lat") => Some(Field::Latitude),
        (EntityKind::Point, "lon") => Some(Field::Longitude),
        (EntityKind::Line, "nd") => Some(Field::NodeRefs),
        (EntityKind::Grouping, "member") => Some(Field::Members),
        _ => None,
    }
}

/// Top-level keys of an `osmChange` object that carry no changes.
const DOCUMENT_ATTRIBUTES: [&str; 2] = ["version", "generator"];

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a change document from JSON text.
///
/// # Errors
///
/// - `Error::DocumentParse` for malformed JSON or structure
/// - `Error::DuplicatePlaceholder` when a create block repeats a placeholder
///
/// # Example
///
/// ```rust
/// use roadgraph::codec::decode_document;
/// use roadgraph::config::UnknownAttributePolicy;
///
/// let doc = decode_document(
///     r#"{"create": {"node": {"id": -1, "lat": 10, "lon": 20}}}"#,
///     UnknownAttributePolicy::Ignore,
/// )?;
/// assert_eq!(doc.create.points.len(), 1);
/// # Ok::<(), roadgraph::Error>(())
/// ```
pub fn decode_document(text: &str, policy: UnknownAttributePolicy) -> Result<ChangeDocument> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::parse(format!("invalid JSON: {}", e)))?;
    decode_value(&value, policy)
}

/// Decodes a change document that has already been parsed into a JSON value.
pub fn decode_value(value: &Value, policy: UnknownAttributePolicy) -> Result<ChangeDocument> {
    let root = as_object(value, "document")?;
    let root = match root.get("osmChange") {
        Some(inner) => as_object(inner, "osmChange")?,
        None => root,
    };

    let mut decoder = Decoder {
        policy,
        document: ChangeDocument::default(),
    };

    for (key, body) in root {
        let action = match key.as_str() {
            "create" => Action::Create,
            "modify" => Action::Modify,
            "delete" => Action::Delete,
            other if DOCUMENT_ATTRIBUTES.contains(&other) => continue,
            other => {
                decoder.unknown("document", other)?;
                continue;
            }
        };
        for block in one_or_many(body) {
            decoder.decode_block(action, block)?;
        }
    }

    check_unique_placeholders(&decoder.document.create)?;

    Ok(decoder.document)
}

/// Treats `null` as empty, an array as its elements and anything else as a
/// single element.
fn one_or_many(value: &Value) -> Vec<&Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        // An empty XML element converts to "".
        Value::String(s) if s.is_empty() => Vec::new(),
        other => vec![other],
    }
}

struct Decoder {
    policy: UnknownAttributePolicy,
    document: ChangeDocument,
}

impl Decoder {
    fn unknown(&self, path: &str, name: &str) -> Result<()> {
        match self.policy {
            UnknownAttributePolicy::Ignore => {
                debug!(path, attribute = name, "ignoring unknown attribute");
                Ok(())
            }
            UnknownAttributePolicy::Reject => Err(Error::parse(format!(
                "{}: unknown attribute '{}'",
                path, name
            ))),
        }
    }

    fn decode_block(&mut self, action: Action, block: &Value) -> Result<()> {
        let path = action.wire_name();
        let object = as_object(block, path)?;

        for (key, elements) in object {
            let kind = match key.as_str() {
                "node" => EntityKind::Point,
                "way" => EntityKind::Line,
                "relation" => EntityKind::Grouping,
                other => {
                    self.unknown(path, other)?;
                    continue;
                }
            };

            for element in one_or_many(elements) {
                let index = self.document.block(action).count(kind);
                let element_path = format!("{}.{}[{}]", path, kind, index);
                self.decode_element(action, kind, element, &element_path)?;
            }
        }
        Ok(())
    }

    fn decode_element(
        &mut self,
        action: Action,
        kind: EntityKind,
        element: &Value,
        path: &str,
    ) -> Result<()> {
        let object = as_object(element, path)?;

        let mut id = None;
        let mut version = None;
        let mut changeset = None;
        let mut visible = true;
        let mut lat = None;
        let mut lon = None;
        let mut tags = Vec::new();
        let mut nodes = Vec::new();
        let mut members = Vec::new();

        for (name, value) in object {
            let attr_path = format!("{}.{}", path, name);
            let Some(field) = field_for(kind, name) else {
                self.unknown(path, name)?;
                continue;
            };

            match field {
                Field::Id => id = Some(as_i64(value, &attr_path)?),
                Field::Version => {
                    let raw = as_i64(value, &attr_path)?;
                    if raw < 0 {
                        return Err(Error::parse(format!(
                            "{}: version must not be negative, got {}",
                            attr_path, raw
                        )));
                    }
                    if raw == i64::MAX {
                        return Err(Error::parse(format!(
                            "{}: version {} is out of range",
                            attr_path, raw
                        )));
                    }
                    version = Some(Version::from_raw(raw as u64));
                }
                Field::Changeset => {
                    changeset = Some(ChangesetId::from_raw(as_i64(value, &attr_path)?))
                }
                Field::Visible => visible = as_bool(value, &attr_path)?,
                Field::Latitude => lat = Some(as_f64(value, &attr_path)?),
                Field::Longitude => lon = Some(as_f64(value, &attr_path)?),
                Field::Tags => tags = decode_tags(value, &attr_path)?,
                Field::NodeRefs => nodes = decode_node_refs(value, &attr_path)?,
                Field::Members => members = decode_members(value, &attr_path)?,
                Field::ServerAssigned => {}
            }
        }

        let raw_id = id.ok_or_else(|| Error::parse(format!("{}: missing id", path)))?;
        let id = element_ref(action, raw_id, path)?;

        let meta = ElementMeta {
            id,
            version,
            changeset,
            visible,
            tags,
        };

        let block = self.document.block_mut(action);
        match kind {
            EntityKind::Point => {
                let coordinate = match (lat, lon) {
                    (Some(lat), Some(lon)) => Some(Coordinate::from_degrees(lat, lon).ok_or_else(
                        || {
                            Error::parse(format!(
                                "{}: coordinate out of range (lat {}, lon {})",
                                path, lat, lon
                            ))
                        },
                    )?),
                    (None, None) if action == Action::Delete => None,
                    _ => {
                        return Err(Error::parse(format!(
                            "{}: {} node needs both lat and lon",
                            path, action
                        )))
                    }
                };
                block.points.push(PointRecord { meta, coordinate });
            }
            EntityKind::Line => block.lines.push(LineRecord { meta, nodes }),
            EntityKind::Grouping => block.groupings.push(GroupingRecord { meta, members }),
        }
        Ok(())
    }
}

/// Classifies an element id against the action it appears in.
fn element_ref(action: Action, raw: i64, path: &str) -> Result<EntityRef> {
    let reference = EntityRef::from_wire(raw)
        .ok_or_else(|| Error::parse(format!("{}: id 0 is not valid", path)))?;

    match (action, reference) {
        (Action::Create, EntityRef::Placeholder(_)) => Ok(reference),
        (Action::Create, EntityRef::Existing(_)) => Err(Error::parse(format!(
            "{}: created elements need a negative placeholder id, got {}",
            path, raw
        ))),
        (_, EntityRef::Existing(_)) => Ok(reference),
        (_, EntityRef::Placeholder(_)) => Err(Error::parse(format!(
            "{}: placeholder id {} is only valid in create",
            path, raw
        ))),
    }
}

/// Fails on the first placeholder declared twice for one kind.
fn check_unique_placeholders(create: &ChangeBlock) -> Result<()> {
    let ids = [
        (EntityKind::Point, create.points.iter().map(|r| r.meta.id).collect::<Vec<_>>()),
        (EntityKind::Line, create.lines.iter().map(|r| r.meta.id).collect()),
        (EntityKind::Grouping, create.groupings.iter().map(|r| r.meta.id).collect()),
    ];

    for (kind, refs) in ids {
        let mut seen = HashSet::new();
        for reference in refs {
            if let EntityRef::Placeholder(placeholder) = reference {
                if !seen.insert(placeholder) {
                    return Err(Error::DuplicatePlaceholder { kind, placeholder });
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Nested Lists
// =============================================================================

fn decode_tags(value: &Value, path: &str) -> Result<Vec<Tag>> {
    let mut tags = Vec::new();
    let mut keys = HashSet::new();

    for (i, item) in one_or_many(value).into_iter().enumerate() {
        let item_path = format!("{}[{}]", path, i);
        let object = as_object(item, &item_path)?;
        let key = object
            .get("k")
            .map(|k| as_text(k, &item_path))
            .transpose()?
            .ok_or_else(|| Error::parse(format!("{}: tag without k", item_path)))?;
        let value = object
            .get("v")
            .map(|v| as_text(v, &item_path))
            .transpose()?
            .unwrap_or_default();

        if !keys.insert(key.clone()) {
            return Err(Error::parse(format!(
                "{}: duplicate tag key '{}'",
                item_path, key
            )));
        }
        tags.push(Tag::new(key, value));
    }
    Ok(tags)
}

fn decode_node_refs(value: &Value, path: &str) -> Result<Vec<EntityRef>> {
    one_or_many(value)
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let item_path = format!("{}[{}]", path, i);
            let object = as_object(item, &item_path)?;
            let raw = object
                .get("ref")
                .ok_or_else(|| Error::parse(format!("{}: nd without ref", item_path)))?;
            reference(as_i64(raw, &item_path)?, &item_path)
        })
        .collect()
}

fn decode_members(value: &Value, path: &str) -> Result<Vec<Member>> {
    one_or_many(value)
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let item_path = format!("{}[{}]", path, i);
            let object = as_object(item, &item_path)?;

            let type_name = object
                .get("type")
                .map(|t| as_text(t, &item_path))
                .transpose()?
                .ok_or_else(|| Error::parse(format!("{}: member without type", item_path)))?;
            let kind = EntityKind::from_member_type(&type_name).ok_or_else(|| {
                Error::parse(format!("{}: unknown member type '{}'", item_path, type_name))
            })?;

            let raw = object
                .get("ref")
                .ok_or_else(|| Error::parse(format!("{}: member without ref", item_path)))?;
            let reference = reference(as_i64(raw, &item_path)?, &item_path)?;

            let role = object
                .get("role")
                .map(|r| as_text(r, &item_path))
                .transpose()?
                .unwrap_or_default();

            Ok(Member {
                kind,
                reference,
                role,
            })
        })
        .collect()
}

fn reference(raw: i64, path: &str) -> Result<EntityRef> {
    EntityRef::from_wire(raw).ok_or_else(|| Error::parse(format!("{}: ref 0 is not valid", path)))
}

// =============================================================================
// Scalar Coercion
// =============================================================================

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::parse(format!("{}: expected an object", path)))
}

fn as_i64(value: &Value, path: &str) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::parse(format!("{}: expected an integer, got {}", path, value)))
}

fn as_f64(value: &Value, path: &str) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::parse(format!("{}: expected a number, got {}", path, value)))
}

fn as_bool(value: &Value, path: &str) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        _ => Err(Error::parse(format!(
            "{}: expected true or false, got {}",
            path, value
        ))),
    }
}

/// Tag and role text. Converters sometimes emit numeric values unquoted.
fn as_text(value: &Value, path: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::parse(format!("{}: expected text, got {}", path, value))),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityId;

    fn decode(text: &str) -> Result<ChangeDocument> {
        decode_document(text, UnknownAttributePolicy::Ignore)
    }

    fn parse_message(err: Error) -> String {
        match err {
            Error::DocumentParse { message } => message,
            other => panic!("expected DocumentParse, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_full_create_block() {
        let doc = decode(
            r#"{
                "create": {
                    "node": [
                        {"id": -1, "lat": 10.0, "lon": 20.0, "tag": [{"k": "highway", "v": "crossing"}]},
                        {"id": -2, "lat": "10.5", "lon": "20.5"}
                    ],
                    "way": {"id": -1, "nd": [{"ref": -1}, {"ref": -2}], "tag": {"k": "highway", "v": "primary"}},
                    "relation": {"id": -1, "member": [{"type": "way", "ref": -1, "role": "outer"}]}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(doc.create.points.len(), 2);
        assert_eq!(doc.create.lines.len(), 1);
        assert_eq!(doc.create.groupings.len(), 1);
        assert!(doc.modify.is_empty());

        let first = &doc.create.points[0];
        assert_eq!(first.meta.id, EntityRef::Placeholder(-1));
        assert_eq!(first.coordinate, Some(Coordinate::from_fixed(100_000_000, 200_000_000)));
        assert_eq!(first.meta.tags, vec![Tag::new("highway", "crossing")]);
        assert!(first.meta.visible);

        let line = &doc.create.lines[0];
        assert_eq!(
            line.nodes,
            vec![EntityRef::Placeholder(-1), EntityRef::Placeholder(-2)]
        );
        assert_eq!(line.meta.tags.len(), 1);

        let member = &doc.create.groupings[0].members[0];
        assert_eq!(member.kind, EntityKind::Line);
        assert_eq!(member.reference, EntityRef::Placeholder(-1));
        assert_eq!(member.role, "outer");
    }

    #[test]
    fn test_osm_change_wrapper_and_attributes() {
        let doc = decode(
            r#"{"osmChange": {"version": "0.6", "generator": "iD",
                "modify": {"node": {"id": "42", "version": "3", "changeset": 7,
                                    "lat": 1, "lon": 2, "timestamp": "2020-01-01T00:00:00Z",
                                    "visible": "true"}}}}"#,
        )
        .unwrap();

        let point = &doc.modify.points[0];
        assert_eq!(point.meta.id, EntityRef::Existing(EntityId::from_raw(42)));
        assert_eq!(point.meta.version, Some(Version::from_raw(3)));
        assert_eq!(point.meta.changeset, Some(ChangesetId::from_raw(7)));
    }

    #[test]
    fn test_multiple_blocks_per_action_concatenate() {
        let doc = decode(
            r#"{"create": [
                {"node": {"id": -1, "lat": 0, "lon": 0}},
                {"node": {"id": -2, "lat": 1, "lon": 1}}
            ]}"#,
        )
        .unwrap();

        let ids: Vec<_> = doc.create.points.iter().map(|p| p.meta.id).collect();
        assert_eq!(
            ids,
            vec![EntityRef::Placeholder(-1), EntityRef::Placeholder(-2)]
        );
    }

    #[test]
    fn test_empty_blocks() {
        let doc = decode(r#"{"create": "", "modify": null, "delete": {}}"#).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_positive_id_in_create_rejected() {
        let err = decode(r#"{"create": {"node": {"id": 5, "lat": 0, "lon": 0}}}"#).unwrap_err();
        assert!(parse_message(err).contains("negative placeholder"));
    }

    #[test]
    fn test_placeholder_in_modify_rejected() {
        let err = decode(r#"{"modify": {"way": {"id": -5, "nd": []}}}"#).unwrap_err();
        assert!(parse_message(err).contains("only valid in create"));
    }

    #[test]
    fn test_placeholder_refs_allowed_in_modify() {
        let doc = decode(r#"{"modify": {"way": {"id": 5, "nd": [{"ref": -1}, {"ref": 3}]}}}"#)
            .unwrap();
        assert_eq!(
            doc.modify.lines[0].nodes,
            vec![
                EntityRef::Placeholder(-1),
                EntityRef::Existing(EntityId::from_raw(3))
            ]
        );
    }

    #[test]
    fn test_duplicate_placeholder_rejected() {
        let err = decode(
            r#"{"create": {"node": [{"id": -1, "lat": 0, "lon": 0}, {"id": -1, "lat": 1, "lon": 1}]}}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicatePlaceholder {
                kind: EntityKind::Point,
                placeholder: -1
            }
        ));
    }

    #[test]
    fn test_same_placeholder_across_kinds_allowed() {
        let doc = decode(
            r#"{"create": {"node": {"id": -1, "lat": 0, "lon": 0}, "way": {"id": -1, "nd": {"ref": -1}}}}"#,
        )
        .unwrap();
        assert_eq!(doc.create.len(), 2);
    }

    #[test]
    fn test_duplicate_tag_key_rejected() {
        let err = decode(
            r#"{"create": {"node": {"id": -1, "lat": 0, "lon": 0,
                "tag": [{"k": "name", "v": "a"}, {"k": "name", "v": "b"}]}}}"#,
        )
        .unwrap_err();
        assert!(parse_message(err).contains("duplicate tag key 'name'"));
    }

    #[test]
    fn test_coordinate_validation() {
        let err = decode(r#"{"create": {"node": {"id": -1, "lat": 91, "lon": 0}}}"#).unwrap_err();
        assert!(parse_message(err).contains("out of range"));

        let err = decode(r#"{"create": {"node": {"id": -1, "lat": 1}}}"#).unwrap_err();
        assert!(parse_message(err).contains("needs both lat and lon"));

        // Deletes may omit coordinates.
        let doc = decode(r#"{"delete": {"node": {"id": 9, "version": 1}}}"#).unwrap();
        assert_eq!(doc.delete.points[0].coordinate, None);
    }

    #[test]
    fn test_version_range() {
        let err = decode(r#"{"modify": {"node": {"id": 5, "version": -2, "lat": 0, "lon": 0}}}"#)
            .unwrap_err();
        assert!(parse_message(err).contains("must not be negative"));

        let err = decode(
            r#"{"modify": {"node": {"id": 5, "version": 9223372036854775807, "lat": 0, "lon": 0}}}"#,
        )
        .unwrap_err();
        assert!(parse_message(err).contains("out of range"));
    }

    #[test]
    fn test_unknown_attribute_policy() {
        let text = r#"{"create": {"node": {"id": -1, "lat": 0, "lon": 0, "colour": "red"}}}"#;

        assert!(decode_document(text, UnknownAttributePolicy::Ignore).is_ok());

        let err = decode_document(text, UnknownAttributePolicy::Reject).unwrap_err();
        assert!(parse_message(err).contains("unknown attribute 'colour'"));
    }

    #[test]
    fn test_kind_specific_attributes() {
        assert_eq!(field_for(EntityKind::Point, "lat"), Some(Field::Latitude));
        assert_eq!(field_for(EntityKind::Line, "lat"), None);
        assert_eq!(field_for(EntityKind::Line, "nd"), Some(Field::NodeRefs));
        assert_eq!(field_for(EntityKind::Grouping, "member"), Some(Field::Members));
        assert_eq!(field_for(EntityKind::Grouping, "uid"), Some(Field::ServerAssigned));
    }

    #[test]
    fn test_malformed_structure() {
        assert!(matches!(
            decode("not json").unwrap_err(),
            Error::DocumentParse { .. }
        ));
        assert!(matches!(
            decode(r#"{"create": {"node": {"lat": 0, "lon": 0}}}"#).unwrap_err(),
            Error::DocumentParse { .. }
        ));
        assert!(matches!(
            decode(r#"{"create": {"relation": {"id": -1, "member": {"type": "area", "ref": 1}}}}"#)
                .unwrap_err(),
            Error::DocumentParse { .. }
        ));
    }

    #[test]
    fn test_error_path_names_element() {
        let err = decode(
            r#"{"create": {"node": [{"id": -1, "lat": 0, "lon": 0}, {"id": -2, "lat": "x", "lon": 0}]}}"#,
        )
        .unwrap_err();
        assert!(parse_message(err).starts_with("create.node[1].lat"));
    }
}
