use std::fs;
use std::path::Path;

use anyhow::bail;
use mariner::MigrateConfig;

use super::{config_base, ensure_directory, Outcome};

pub fn run(config_path: Option<&Path>, directory: Option<&Path>) -> anyhow::Result<Outcome> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(MigrateConfig::default_path);
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    let mut config = MigrateConfig::default();
    if let Some(directory) = directory {
        config.directory = directory.to_path_buf();
    }
    config.validate()?;

    ensure_directory(&config_base(&config_path).join(&config.directory))?;
    fs::write(&config_path, config.to_yaml()?)?;

    println!("✅ Created {}", config_path.display());
    println!("   Migrations directory: {}", config.directory.display());
    Ok(Outcome::Complete)
}
