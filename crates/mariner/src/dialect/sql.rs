//! Raw SQL dialect
//!
//! One `.sql` file holds both directions, separated by marker comments:
//!
//! ```sql
//! -- Up migration
//! CREATE TABLE users (id BIGINT PRIMARY KEY);
//!
//! -- Down migration
//! DROP TABLE users;
//! ```
//!
//! Lines before the first marker belong to the up section. A file without a
//! down marker cannot be reverted. `-- mariner:no-transaction` runs both
//! directions outside a transaction.

use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use super::{zero_row_warning, Dialect, MigrationOperation, ParseWarning};
use crate::error::MigrateResult;
use crate::migrations::definitions::Direction;
use crate::store::{ExecutionOutput, Procedure};

const NO_TRANSACTION: &str = "mariner:no-transaction";

const TEMPLATE: &str = "-- Migration: {{name}}\n\
-- ID: {{id}}\n\
-- Created: {{created}}\n\
\n\
-- Up migration\n\
\n\
\n\
-- Down migration\n\
\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Up,
    Down,
}

#[derive(Debug, Default, Clone)]
pub struct SqlDialect;

impl SqlDialect {
    pub fn new() -> Self {
        Self
    }

    /// Classify a comment line as a section marker
    fn marker(line: &str) -> Option<Section> {
        let body = line.trim().strip_prefix("--")?.trim().to_lowercase();
        match body.as_str() {
            "up" | "up migration" | "+migrate up" => Some(Section::Up),
            "down" | "down migration" | "+migrate down" => Some(Section::Down),
            _ => None,
        }
    }

    /// Split migration content into up and down SQL; `None` when the file
    /// has no down marker.
    fn sections(content: &str) -> (String, Option<String>, bool) {
        let mut up_sql = Vec::new();
        let mut down_sql: Option<Vec<&str>> = None;
        let mut current = Section::Up;
        let mut transactional = true;

        for line in content.lines() {
            if let Some(section) = Self::marker(line) {
                current = section;
                if section == Section::Down && down_sql.is_none() {
                    down_sql = Some(Vec::new());
                }
                continue;
            }

            let trimmed = line.trim();
            if trimmed.starts_with("--") {
                if trimmed.trim_start_matches('-').trim() == NO_TRANSACTION {
                    transactional = false;
                }
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }

            match current {
                Section::Up => up_sql.push(line),
                Section::Down => {
                    if let Some(down) = down_sql.as_mut() {
                        down.push(line);
                    }
                }
            }
        }

        (
            up_sql.join("\n").trim().to_string(),
            down_sql.map(|lines| lines.join("\n").trim().to_string()),
            transactional,
        )
    }

    /// Split SQL statements for execution using proper SQL parsing
    pub fn split_statements(sql: &str) -> (Vec<String>, Option<String>) {
        if sql.trim().is_empty() {
            return (Vec::new(), None);
        }

        match Parser::parse_sql(&GenericDialect {}, sql) {
            Ok(parsed) => (parsed.iter().map(|stmt| format!("{};", stmt)).collect(), None),
            Err(e) => {
                // Fall back to naive splitting; the caller reports it as a warning
                let naive = sql
                    .split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| format!("{};", s))
                    .collect();
                (
                    naive,
                    Some(format!("SQL parsing failed, used naive semicolon splitting: {}", e)),
                )
            }
        }
    }

    fn procedure(
        sql: &str,
        transactional: bool,
        direction: Direction,
        warnings: &mut Vec<ParseWarning>,
    ) -> Procedure {
        let (statements, fallback) = Self::split_statements(sql);
        if let Some(warning) = fallback {
            warnings.push(ParseWarning::new(direction, format!("{} section: {}", direction, warning)));
        }
        if statements.is_empty() {
            warnings.push(ParseWarning::new(
                direction,
                format!("{} section is empty (no-op)", direction),
            ));
        }
        Procedure {
            statements,
            transactional,
        }
    }
}

impl Dialect for SqlDialect {
    fn name(&self) -> &str {
        "sql"
    }

    fn extensions(&self) -> &[&str] {
        &["sql"]
    }

    fn parse(&self, _id: &str, content: &str) -> MigrateResult<MigrationOperation> {
        let (up_sql, down_sql, transactional) = Self::sections(content);
        let mut warnings = Vec::new();

        let up = Self::procedure(&up_sql, transactional, Direction::Up, &mut warnings);
        let down = down_sql.map(|sql| Self::procedure(&sql, transactional, Direction::Down, &mut warnings));

        Ok(MigrationOperation { up, down, warnings })
    }

    fn execution_warning(&self, output: &ExecutionOutput) -> Option<String> {
        zero_row_warning(output)
    }

    fn template(&self) -> &str {
        TEMPLATE
    }
}
