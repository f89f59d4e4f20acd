use std::path::Path;

use mariner::{CreateOptions, DialectRegistry, MigrationManager};

use super::{load_config, Outcome};

pub fn run(config_path: Option<&Path>, name: &str, extension: &str) -> anyhow::Result<Outcome> {
    let config = load_config(config_path)?;
    let registry = DialectRegistry::from_names(&config.plugins)?;
    let manager = MigrationManager::new(&config.directory, registry)?;

    for path in manager.create_migration(name, &CreateOptions::extension(extension))? {
        println!("Created migration: {}", path.display());
    }
    Ok(Outcome::Complete)
}
