//! Migration Manager - File system operations for migrations
//!
//! Scans the migrations directory, parses file names into ordered ids and
//! binds each file to the dialect registered for its extension.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::definitions::{checksum, MigrationDescriptor};
use crate::dialect::{Dialect, DialectRegistry, MigrationOperation};
use crate::error::{MigrateError, MigrateResult};

static FILE_STEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<prefix>[0-9]+)[_-](?P<label>.+)$").expect("valid regex"));

/// A discovered migration bound to its dialect
#[derive(Clone)]
pub struct Migration {
    pub descriptor: MigrationDescriptor,
    pub dialect: Arc<dyn Dialect>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("descriptor", &self.descriptor)
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

/// Migration content read from disk and parsed by its dialect
#[derive(Debug, Clone)]
pub struct LoadedMigration {
    pub id: String,
    pub checksum: String,
    pub operation: MigrationOperation,
}

impl Migration {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn checksum(&self) -> MigrateResult<String> {
        Ok(checksum(self.descriptor.read_content()?.as_bytes()))
    }

    pub fn load(&self) -> MigrateResult<LoadedMigration> {
        let content = self.descriptor.read_content()?;
        let operation = self.dialect.parse(&self.descriptor.id, &content)?;
        Ok(LoadedMigration {
            id: self.descriptor.id.clone(),
            checksum: checksum(content.as_bytes()),
            operation,
        })
    }
}

/// Migration manager for discovering and creating migrations
#[derive(Debug, Clone)]
pub struct MigrationManager {
    directory: PathBuf,
    registry: DialectRegistry,
}

impl MigrationManager {
    pub fn new(directory: impl Into<PathBuf>, registry: DialectRegistry) -> MigrateResult<Self> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(MigrateError::config(format!(
                "Migrations directory {} does not exist",
                directory.display()
            )));
        }
        if registry.is_empty() {
            return Err(MigrateError::config("No dialect plugins are registered"));
        }
        Ok(Self {
            directory,
            registry,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn registry(&self) -> &DialectRegistry {
        &self.registry
    }

    /// Split a file stem into its ordering prefix and label
    pub fn parse_stem(stem: &str) -> Option<(&str, &str)> {
        let caps = FILE_STEM.captures(stem)?;
        Some((caps.name("prefix")?.as_str(), caps.name("label")?.as_str()))
    }

    /// Load all migration files from the migrations directory, ordered by id.
    /// Files whose extension has no registered dialect are ignored.
    pub fn load_migrations(&self) -> MigrateResult<Vec<Migration>> {
        if !self.directory.is_dir() {
            return Err(MigrateError::config(format!(
                "Migrations directory {} does not exist",
                self.directory.display()
            )));
        }

        let mut found: BTreeMap<String, Migration> = BTreeMap::new();

        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }

            let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let Some(dialect) = self.registry.for_extension(extension) else {
                tracing::trace!("Skipping {}: no dialect for .{}", file_name, extension);
                continue;
            };

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| MigrateError::config(format!("Invalid migration filename {}", file_name)))?;
            let (_, label) = Self::parse_stem(stem).ok_or_else(|| {
                MigrateError::config(format!(
                    "Migration filename {} must follow the format <number>_<name>.{}",
                    file_name, extension
                ))
            })?;

            let migration = Migration {
                descriptor: MigrationDescriptor {
                    id: stem.to_string(),
                    label: label.to_string(),
                    extension: extension.to_string(),
                    source_path: path.clone(),
                },
                dialect: dialect.clone(),
            };

            if let Some(existing) = found.insert(stem.to_string(), migration) {
                return Err(MigrateError::config(format!(
                    "Migration id {} is used by both {} and {}",
                    stem,
                    existing.descriptor.source_path.display(),
                    path.display()
                )));
            }
        }

        // BTreeMap<String, _> iterates in byte order of the id
        Ok(found.into_values().collect())
    }
}
