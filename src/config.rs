//! # Engine Configuration
//!
//! Tunables for the changeset engine. Every field has a default, so an empty
//! JSON object (or no file at all) yields a working configuration:
//!
//! ```json
//! {
//!   "max_rows_per_batch": 1000,
//!   "max_statement_params": 32766,
//!   "version_policy": "trust",
//!   "unknown_attributes": "ignore",
//!   "busy_timeout_ms": 5000
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Defaults
// =============================================================================

/// Maximum rows in one multi-row `INSERT`.
pub const DEFAULT_MAX_ROWS_PER_BATCH: usize = 1000;

/// Maximum bound parameters in one statement.
///
/// SQLite's `SQLITE_MAX_VARIABLE_NUMBER` defaults to 32766 since 3.32. The
/// writer divides this by the column count to size each batch.
pub const DEFAULT_MAX_STATEMENT_PARAMS: usize = 32766;

/// How long a writer waits for a competing lock before failing.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

// =============================================================================
// Policies
// =============================================================================

/// How a client-declared version is treated on modify and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionPolicy {
    /// Accept the declared version without comparing it to storage.
    ///
    /// The declared version is the base being edited; the new version is one
    /// past the larger of the declared and stored versions, so versions never
    /// regress. Two concurrent modifies of one entity can still lose an
    /// update.
    #[default]
    Trust,

    /// Reject a declared version that differs from the stored one with
    /// [`Error::StaleVersion`].
    Strict,
}

/// What the codec does with attributes it does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownAttributePolicy {
    /// Skip the attribute (logged at debug level).
    #[default]
    Ignore,
    /// Fail the document with [`Error::DocumentParse`].
    Reject,
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Configuration shared by the codec, writer, managers and coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum rows per batch insert.
    pub max_rows_per_batch: usize,

    /// Maximum bound parameters per statement.
    pub max_statement_params: usize,

    /// Version check applied on modify and delete.
    pub version_policy: VersionPolicy,

    /// Codec behavior for unrecognized attributes.
    pub unknown_attributes: UnknownAttributePolicy,

    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rows_per_batch: DEFAULT_MAX_ROWS_PER_BATCH,
            max_statement_params: DEFAULT_MAX_STATEMENT_PARAMS,
            version_policy: VersionPolicy::default(),
            unknown_attributes: UnknownAttributePolicy::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from a JSON file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the limits are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_rows_per_batch == 0 {
            return Err(Error::Schema(
                "max_rows_per_batch must be at least 1".to_string(),
            ));
        }
        // The widest row written is a point history row (8 columns).
        if self.max_statement_params < 8 {
            return Err(Error::Schema(format!(
                "max_statement_params must be at least 8, got {}",
                self.max_statement_params
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Returns a copy with a different version policy.
    pub fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Returns a copy with a different batch row limit.
    pub fn with_max_rows_per_batch(mut self, rows: usize) -> Self {
        self.max_rows_per_batch = rows;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.version_policy, VersionPolicy::Trust);
    }

    #[test]
    fn test_partial_override() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"version_policy": "strict", "max_rows_per_batch": 50}"#)
                .unwrap();
        assert_eq!(config.version_policy, VersionPolicy::Strict);
        assert_eq!(config.max_rows_per_batch, 50);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }

    #[test]
    fn test_validate_rejects_zero_rows() {
        let config = EngineConfig::default().with_max_rows_per_batch(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"unknown_attributes": "reject"}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.unknown_attributes, UnknownAttributePolicy::Reject);
    }
}
