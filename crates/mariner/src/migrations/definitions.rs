//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the descriptors discovered on disk, the ledger records kept in the
//! target store, and the request/result types of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::state::MigrationState;
use crate::error::{MigrateError, MigrateResult};

/// A migration file found in the migrations directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDescriptor {
    /// File stem: ordering prefix plus label, e.g. `20240101120000000_create_users`
    pub id: String,
    /// Human-readable part of the id
    pub label: String,
    /// Dialect tag the file is interpreted with
    pub extension: String,
    pub source_path: PathBuf,
}

impl MigrationDescriptor {
    pub fn read_content(&self) -> MigrateResult<String> {
        std::fs::read_to_string(&self.source_path).map_err(|e| MigrateError::InvalidMigration {
            id: self.id.clone(),
            message: format!("failed to read {}: {}", self.source_path.display(), e),
        })
    }
}

/// Lowercase hex SHA-256 of a migration's source
pub fn checksum(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Ledger record of one applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub checksum: String,
    /// Batch number (for grouping migrations)
    pub batch: i64,
    pub applied_at: DateTime<Utc>,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply pending migrations
    Up,
    /// Revert applied migrations
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

impl FromStr for Direction {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            _ => Err(MigrateError::config(format!(
                "Unknown direction '{}', expected 'up' or 'down'",
                s
            ))),
        }
    }
}

/// What a run should do.
///
/// Without a count, `up` applies every pending migration and `down` reverts
/// the most recent batch. With a count, `up` applies at most `count`
/// migrations and `down` reverts the `count` most recent batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub direction: Direction,
    pub count: Option<u32>,
}

impl RunRequest {
    pub fn new(direction: Direction, count: Option<u32>) -> MigrateResult<Self> {
        if count == Some(0) {
            return Err(MigrateError::config("Migration count must be a positive integer"));
        }
        Ok(Self { direction, count })
    }

    pub fn up() -> Self {
        Self {
            direction: Direction::Up,
            count: None,
        }
    }

    pub fn down() -> Self {
        Self {
            direction: Direction::Down,
            count: None,
        }
    }
}

/// A non-fatal condition reported by a dialect for one migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationWarning {
    pub id: String,
    pub message: String,
}

/// An applied migration whose file changed after it was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumDrift {
    pub id: String,
    pub recorded: String,
    pub current: String,
}

/// Final lifecycle state of one candidate in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub id: String,
    pub state: MigrationState,
}

/// Result of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub direction: Direction,
    /// Batch the applied migrations were recorded in (up runs only)
    pub batch: Option<i64>,
    /// Ids applied or reverted, in execution order
    pub migrations: Vec<String>,
    /// The run stopped early because a migration reported a warning
    pub partial: bool,
    pub warnings: Vec<MigrationWarning>,
    pub checksum_mismatches: Vec<ChecksumDrift>,
    pub items: Vec<ItemReport>,
    pub elapsed_ms: u128,
}

impl RunResult {
    pub(crate) fn empty(direction: Direction) -> Self {
        Self {
            direction,
            batch: None,
            migrations: Vec::new(),
            partial: false,
            warnings: Vec::new(),
            checksum_mismatches: Vec::new(),
            items: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        applied_at: DateTime<Utc>,
        batch: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub id: String,
    pub extension: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
    /// Applied, but the file no longer matches the recorded checksum
    pub checksum_changed: bool,
}

/// Status of every discovered migration plus ledger drift
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub migrations: Vec<StatusEntry>,
    /// Ledger entries with no matching file
    pub missing: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn pending(&self) -> impl Iterator<Item = &StatusEntry> {
        self.migrations
            .iter()
            .filter(|e| e.status == MigrationStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("DOWN".parse::<Direction>().unwrap(), Direction::Down);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(MigrateError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_count_rejected() {
        assert!(RunRequest::new(Direction::Up, Some(0)).is_err());
        assert_eq!(
            RunRequest::new(Direction::Down, None).unwrap(),
            RunRequest::down()
        );
    }

    #[test]
    fn test_status_serializes_flat() {
        let entry = StatusEntry {
            id: "20240101_a".to_string(),
            extension: "sql".to_string(),
            status: MigrationStatus::Pending,
            checksum_changed: false,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["state"], "pending");
        assert_eq!(value["id"], "20240101_a");
        assert!(value.get("batch").is_none());
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(checksum(b"CREATE TABLE a();"), checksum(b"CREATE TABLE b();"));
    }
}
