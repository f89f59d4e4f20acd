//! Migration templates - creates new, empty migration files

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use super::manager::MigrationManager;
use crate::error::{MigrateError, MigrateResult};

/// Options for creating a migration
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Extension of the dialect the new file is written for
    pub extension: String,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            extension: "sql".to_string(),
        }
    }
}

impl CreateOptions {
    pub fn extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }
}

pub fn render_template(template: &str, context: &HashMap<&str, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in context {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

/// Turn a human name into the label part of a migration id
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    slug.trim_matches(|c| c == '_' || c == '-').to_string()
}

impl MigrationManager {
    /// Create a new migration file, stamped with the current time
    pub fn create_migration(&self, name: &str, options: &CreateOptions) -> MigrateResult<Vec<PathBuf>> {
        self.create_migration_at(name, options, Utc::now())
    }

    /// Create a new migration file with an explicit creation time
    pub fn create_migration_at(
        &self,
        name: &str,
        options: &CreateOptions,
        now: DateTime<Utc>,
    ) -> MigrateResult<Vec<PathBuf>> {
        let extension = options.extension.trim_start_matches('.');
        let dialect = self.registry().for_extension(extension).ok_or_else(|| {
            MigrateError::config(format!("No dialect plugin handles .{} files", extension))
        })?;

        let label = slugify(name);
        if label.is_empty() {
            return Err(MigrateError::config(format!(
                "Migration name '{}' must contain letters or digits",
                name
            )));
        }

        let migration_id = format!("{}_{}", now.format("%Y%m%d%H%M%S%3f"), label);
        self.ensure_unused(&migration_id)?;

        let mut context = HashMap::new();
        context.insert("name", name.trim().to_string());
        context.insert("id", migration_id.clone());
        context.insert("created", now.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        let content = render_template(dialect.template(), &context);

        let filepath = self.directory().join(format!("{}.{}", migration_id, extension));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&filepath)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => MigrateError::DuplicateName {
                    id: migration_id.clone(),
                },
                _ => MigrateError::Io(e),
            })?;
        file.write_all(content.as_bytes())?;

        tracing::info!("Created migration {}", filepath.display());
        Ok(vec![filepath])
    }

    /// Any file with the same stem claims the id, whatever its extension
    fn ensure_unused(&self, migration_id: &str) -> MigrateResult<()> {
        for entry in fs::read_dir(self.directory())? {
            let path = entry?.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(migration_id) {
                return Err(MigrateError::DuplicateName {
                    id: migration_id.to_string(),
                });
            }
        }
        Ok(())
    }
}
