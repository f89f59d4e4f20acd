//! Structured YAML dialect
//!
//! ```yaml
//! transaction: true
//! up:
//!   - CREATE TABLE users (id BIGINT PRIMARY KEY)
//! down:
//!   - DROP TABLE users
//! ```
//!
//! Each list entry is executed as one statement. `up` and `down` may also be
//! a single string. Leaving `down` out makes the migration irreversible.

use serde::Deserialize;

use super::{zero_row_warning, Dialect, MigrationOperation, ParseWarning};
use crate::error::{MigrateError, MigrateResult};
use crate::migrations::definitions::Direction;
use crate::store::{ExecutionOutput, Procedure};

const TEMPLATE: &str = "# Migration: {{name}}\n\
# ID: {{id}}\n\
# Created: {{created}}\n\
transaction: true\n\
up: []\n\
down: []\n";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Steps {
    One(String),
    Many(Vec<String>),
}

impl Steps {
    fn into_statements(self) -> Vec<String> {
        let steps = match self {
            Steps::One(step) => vec![step],
            Steps::Many(steps) => steps,
        };
        steps
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn default_transaction() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    up: Steps,
    #[serde(default)]
    down: Option<Steps>,
    #[serde(default = "default_transaction")]
    transaction: bool,
}

#[derive(Debug, Default, Clone)]
pub struct YamlDialect;

impl YamlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for YamlDialect {
    fn name(&self) -> &str {
        "yaml"
    }

    fn extensions(&self) -> &[&str] {
        &["yaml", "yml"]
    }

    fn parse(&self, id: &str, content: &str) -> MigrateResult<MigrationOperation> {
        let doc: Document = serde_yaml::from_str(content).map_err(|e| MigrateError::InvalidMigration {
            id: id.to_string(),
            message: e.to_string(),
        })?;

        let mut warnings = Vec::new();
        let up = doc.up.into_statements();
        if up.is_empty() {
            warnings.push(ParseWarning::new(Direction::Up, "up section is empty (no-op)"));
        }
        let down = doc.down.map(|steps| {
            let statements = steps.into_statements();
            if statements.is_empty() {
                warnings.push(ParseWarning::new(Direction::Down, "down section is empty (no-op)"));
            }
            Procedure {
                statements,
                transactional: doc.transaction,
            }
        });

        Ok(MigrationOperation {
            up: Procedure {
                statements: up,
                transactional: doc.transaction,
            },
            down,
            warnings,
        })
    }

    fn execution_warning(&self, output: &ExecutionOutput) -> Option<String> {
        zero_row_warning(output)
    }

    fn template(&self) -> &str {
        TEMPLATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_lists_and_scalars() {
        let op = YamlDialect::new()
            .parse(
                "1_users",
                "up:\n  - CREATE TABLE users (id INT)\n  - CREATE INDEX users_id ON users (id)\ndown: DROP TABLE users\n",
            )
            .unwrap();

        assert_eq!(op.up.statements.len(), 2);
        assert!(op.up.transactional);
        assert_eq!(op.down.as_ref().unwrap().statements, vec!["DROP TABLE users"]);
        assert!(op.warnings.is_empty());
    }

    #[test]
    fn test_missing_down_and_transaction_flag() {
        let op = YamlDialect::new()
            .parse("1_idx", "transaction: false\nup: CREATE INDEX CONCURRENTLY i ON t (c)\n")
            .unwrap();
        assert!(op.down.is_none());
        assert!(!op.up.transactional);
    }

    #[test]
    fn test_template_parses_as_noop() {
        let op = YamlDialect::new().parse("1_new", YamlDialect::new().template()).unwrap();
        assert!(op.up.statements.is_empty());
        assert_eq!(op.down.as_ref().unwrap().statements.len(), 0);
        assert_eq!(op.warnings.len(), 2);
        assert_eq!(op.warnings_for(Direction::Down).count(), 1);
    }

    #[test]
    fn test_malformed_document() {
        let err = YamlDialect::new().parse("1_bad", "upp: []\n").unwrap_err();
        assert!(matches!(err, MigrateError::InvalidMigration { id, .. } if id == "1_bad"));
    }
}
