//! Dialect plugins
//!
//! A dialect turns the raw content of a migration file into executable up
//! and down procedures. Dialects are selected by file extension; the
//! [`DialectRegistry`] resolves the enabled plugins once, when the
//! orchestrator is initialised.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{MigrateError, MigrateResult};
use crate::migrations::definitions::Direction;
use crate::store::{ExecutionOutput, Procedure};

pub mod sql;
pub mod yaml;

pub use sql::SqlDialect;
pub use yaml::YamlDialect;

/// Executable artifact parsed from one migration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOperation {
    pub up: Procedure,
    /// `None` makes the migration revert-incapable
    pub down: Option<Procedure>,
    /// Non-fatal findings from parsing, reported when that direction runs
    pub warnings: Vec<ParseWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub direction: Direction,
    pub message: String,
}

impl ParseWarning {
    pub fn new(direction: Direction, message: impl Into<String>) -> Self {
        Self {
            direction,
            message: message.into(),
        }
    }
}

impl MigrationOperation {
    pub fn procedure(&self, direction: Direction) -> Option<&Procedure> {
        match direction {
            Direction::Up => Some(&self.up),
            Direction::Down => self.down.as_ref(),
        }
    }

    pub fn warnings_for(&self, direction: Direction) -> impl Iterator<Item = &str> {
        self.warnings
            .iter()
            .filter(move |w| w.direction == direction)
            .map(|w| w.message.as_str())
    }
}

pub trait Dialect: Send + Sync {
    /// Plugin name, as listed in the `plugins` configuration
    fn name(&self) -> &str;

    /// File extensions this dialect claims, without the leading dot
    fn extensions(&self) -> &[&str];

    fn parse(&self, id: &str, content: &str) -> MigrateResult<MigrationOperation>;

    /// Inspect a successful execution for conditions worth stopping on
    fn execution_warning(&self, _output: &ExecutionOutput) -> Option<String> {
        None
    }

    /// Empty up/down skeleton for new migrations; `{{name}}`, `{{id}}` and
    /// `{{created}}` are substituted by the template factory.
    fn template(&self) -> &str;
}

impl fmt::Debug for dyn Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialect")
            .field("name", &self.name())
            .field("extensions", &self.extensions())
            .finish()
    }
}

/// Flags `UPDATE`/`DELETE` statements that touched no rows
pub fn zero_row_warning(output: &ExecutionOutput) -> Option<String> {
    output
        .statements
        .iter()
        .find(|outcome| {
            let head = outcome.statement.trim_start().to_ascii_uppercase();
            outcome.rows_affected == 0 && (head.starts_with("UPDATE") || head.starts_with("DELETE"))
        })
        .map(|outcome| {
            format!(
                "statement affected no rows: {}",
                first_line(&outcome.statement)
            )
        })
}

fn first_line(statement: &str) -> &str {
    statement.trim().lines().next().unwrap_or_default()
}

/// Enabled dialects keyed by extension
#[derive(Clone, Default)]
pub struct DialectRegistry {
    by_extension: BTreeMap<String, Arc<dyn Dialect>>,
}

impl DialectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialects shipped with mariner
    pub fn builtin(name: &str) -> Option<Arc<dyn Dialect>> {
        match name {
            "sql" => Some(Arc::new(SqlDialect::new())),
            "yaml" => Some(Arc::new(YamlDialect::new())),
            _ => None,
        }
    }

    /// Registry of the named built-in dialects
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> MigrateResult<Self> {
        if names.is_empty() {
            return Err(MigrateError::config("No dialect plugins are enabled"));
        }

        let mut registry = Self::new();
        for name in names {
            let name = name.as_ref();
            let dialect = Self::builtin(name)
                .ok_or_else(|| MigrateError::config(format!("Unknown dialect plugin '{}'", name)))?;
            registry.register(dialect)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, dialect: Arc<dyn Dialect>) -> MigrateResult<()> {
        if dialect.extensions().is_empty() {
            return Err(MigrateError::config(format!(
                "Dialect '{}' claims no file extensions",
                dialect.name()
            )));
        }

        // Check every claim first so a rejected dialect leaves no extension behind
        let mut claimed: Vec<String> = Vec::with_capacity(dialect.extensions().len());
        for ext in dialect.extensions() {
            let ext = ext.trim_start_matches('.').to_string();
            let owner = self
                .by_extension
                .get(&ext)
                .map(|existing| existing.name().to_string())
                .or_else(|| claimed.contains(&ext).then(|| dialect.name().to_string()));
            if let Some(owner) = owner {
                return Err(MigrateError::config(format!(
                    "Extension '.{}' is claimed by both '{}' and '{}'",
                    ext,
                    owner,
                    dialect.name()
                )));
            }
            claimed.push(ext);
        }

        for ext in claimed {
            self.by_extension.insert(ext, dialect.clone());
        }

        tracing::debug!("Registered dialect '{}' for {:?}", dialect.name(), dialect.extensions());
        Ok(())
    }

    pub fn for_extension(&self, extension: &str) -> Option<&Arc<dyn Dialect>> {
        self.by_extension.get(extension)
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.by_extension.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

impl fmt::Debug for DialectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.by_extension.iter().map(|(ext, d)| (ext, d.name())))
            .finish()
    }
}
