pub mod create;
pub mod init;
pub mod migrate;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::Context;
use mariner::MigrateConfig;

/// How a successful command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    /// A run stopped early on a warning
    Partial,
}

/// Load the configuration named by `--config`, or `mariner.yaml` when it
/// exists. Without either, defaults apply relative to the working directory.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<MigrateConfig> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (MigrateConfig::default_path(), false),
    };

    if !explicit && !path.exists() {
        tracing::debug!("No {} found, using default configuration", path.display());
        return Ok(MigrateConfig::default());
    }

    let config = MigrateConfig::load(&path)?;
    Ok(config.relative_to(&config_base(&path)))
}

pub(crate) fn config_base(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub(crate) fn ensure_directory(path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create {}", path.display()))
}
