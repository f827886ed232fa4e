//! # Error Handling for the Changeset Engine
//!
//! This module defines the error types used throughout the crate. A single
//! error enum ([`Error`]) represents every failure mode, which keeps function
//! signatures short and lets callers match on the outcome of a changeset in
//! one place.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations:
//! `Display` comes from the `#[error(...)]` attributes and `From` impls from
//! `#[from]`. The one exception is `rusqlite::Error`, converted by hand so
//! constraint violations land in [`Error::Integrity`].
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Document | Parse failure, unresolved placeholder | Fix the document, resubmit |
//! | State | Stale version, deleted entity | Re-read, rebuild the edit |
//! | Storage | Integrity violation, SQLite error | Whole changeset rejected |
//! | Lifecycle | Cancelled, writer shut down | Resubmit the whole document |
//!
//! Every variant aborts the entire transaction. There is no partial apply:
//! a changeset is either fully applied or fully rejected.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::types::{ChangesetId, EntityId, EntityKind, Version};

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur while decoding or applying a changeset.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Document Errors (rejected before or during apply, caller must fix input)
    // =========================================================================

    /// The change document is structurally malformed.
    ///
    /// Raised by the codec before any transaction opens.
    #[error("document parse error: {message}")]
    DocumentParse {
        /// Human-readable description, including the offending element path.
        message: String,
    },

    /// The same placeholder id was declared twice for one entity kind.
    #[error("duplicate placeholder {placeholder} for {kind}")]
    DuplicatePlaceholder { kind: EntityKind, placeholder: i64 },

    /// A reference names a placeholder never declared in the create block.
    ///
    /// # When This Happens
    ///
    /// A line lists `{"ref": -99}` but no point with id `-99` was created
    /// earlier in the same document.
    #[error("unresolved reference to {kind} placeholder {placeholder}")]
    UnresolvedReference { kind: EntityKind, placeholder: i64 },

    // =========================================================================
    // State Errors (the edit does not fit the stored entity)
    // =========================================================================

    /// The declared base version does not match the stored version.
    ///
    /// Only raised under [`VersionPolicy::Strict`](crate::config::VersionPolicy).
    #[error("stale version for {kind} {id}: declared {declared}, stored {stored}")]
    StaleVersion {
        kind: EntityKind,
        id: EntityId,
        declared: Version,
        stored: Version,
    },

    /// A modify or delete targets an id with no current row.
    #[error("{kind} {id} does not exist")]
    EntityNotFound { kind: EntityKind, id: EntityId },

    /// A modify or delete targets an entity that is already soft-deleted.
    ///
    /// Deletion is terminal: the row is kept for history but accepts no
    /// further edits.
    #[error("{kind} {id} has been deleted")]
    EntityDeleted { kind: EntityKind, id: EntityId },

    /// The session changeset does not exist.
    #[error("changeset {id} does not exist")]
    ChangesetNotFound { id: ChangesetId },

    // =========================================================================
    // Storage Errors
    // =========================================================================

    /// A storage constraint rejected a write.
    ///
    /// # When This Happens
    ///
    /// - A row references a changeset that does not exist
    /// - A line references a point id that does not exist
    /// - A duplicate primary key, such as a repeated (id, version) history row
    #[error("integrity error: {message}")]
    Integrity { message: String },

    /// Any other SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// Schema version mismatch, or the writer thread is unavailable.
    #[error("schema error: {0}")]
    Schema(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================

    /// The caller went away before commit; the transaction was rolled back.
    #[error("changeset apply cancelled before commit")]
    Cancelled,

    /// Reading a config or document file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A config file is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable, machine-readable name of the error kind.
    ///
    /// The HTTP layer maps these onto status codes without parsing messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::DocumentParse { .. } => "document_parse",
            Error::DuplicatePlaceholder { .. } => "duplicate_placeholder",
            Error::UnresolvedReference { .. } => "unresolved_reference",
            Error::StaleVersion { .. } => "stale_version",
            Error::EntityNotFound { .. } => "entity_not_found",
            Error::EntityDeleted { .. } => "entity_deleted",
            Error::ChangesetNotFound { .. } => "changeset_not_found",
            Error::Integrity { .. } => "integrity",
            Error::Sqlite(_) => "sqlite",
            Error::Schema(_) => "schema",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    /// The ids this error is about, in wire form (placeholders stay negative).
    pub fn offending_ids(&self) -> Vec<i64> {
        match self {
            Error::DuplicatePlaceholder { placeholder, .. }
            | Error::UnresolvedReference { placeholder, .. } => vec![*placeholder],
            Error::StaleVersion { id, .. }
            | Error::EntityNotFound { id, .. }
            | Error::EntityDeleted { id, .. } => vec![id.as_raw()],
            Error::ChangesetNotFound { id } => vec![id.as_raw()],
            _ => Vec::new(),
        }
    }

    /// Shorthand for building a [`Error::DocumentParse`].
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::DocumentParse {
            message: message.into(),
        }
    }
}

/// Converts SQLite failures, routing constraint violations to
/// [`Error::Integrity`].
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                Error::Integrity {
                    message: message.clone().unwrap_or_else(|| code.to_string()),
                }
            }
            _ => Error::Sqlite(err),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let unresolved = Error::UnresolvedReference {
            kind: EntityKind::Point,
            placeholder: -99,
        };
        assert_eq!(
            unresolved.to_string(),
            "unresolved reference to node placeholder -99"
        );

        let stale = Error::StaleVersion {
            kind: EntityKind::Line,
            id: EntityId::from_raw(500),
            declared: Version::from_raw(2),
            stored: Version::from_raw(4),
        };
        assert_eq!(
            stale.to_string(),
            "stale version for way 500: declared 2, stored 4"
        );
    }

    #[test]
    fn test_kind_and_offending_ids() {
        let err = Error::EntityDeleted {
            kind: EntityKind::Grouping,
            id: EntityId::from_raw(7),
        };
        assert_eq!(err.kind(), "entity_deleted");
        assert_eq!(err.offending_ids(), vec![7]);

        let err = Error::Cancelled;
        assert_eq!(err.kind(), "cancelled");
        assert!(err.offending_ids().is_empty());
    }

    #[test]
    fn test_constraint_violation_becomes_integrity() {
        let sqlite_err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::ConstraintViolation,
                extended_code: 787,
            },
            Some("FOREIGN KEY constraint failed".to_string()),
        );

        let our_err: Error = sqlite_err.into();
        assert!(matches!(our_err, Error::Integrity { .. }));
        assert_eq!(our_err.kind(), "integrity");
        assert!(our_err.to_string().contains("FOREIGN KEY"));
    }

    #[test]
    fn test_other_sqlite_errors_pass_through() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();
        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }
}
