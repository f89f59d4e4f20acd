//! Migration System
//!
//! Discovery of migration files, the per-run orchestration and the types
//! exchanged with callers.

pub mod definitions;
pub mod manager;
pub mod rollback;
pub mod runner;
pub mod state;
pub mod template;

pub use definitions::*;
pub use manager::{LoadedMigration, Migration, MigrationManager};
pub use runner::Orchestrator;
pub use state::{IllegalTransition, Lifecycle, LifecycleEvent, MigrationState};
pub use template::{render_template, slugify, CreateOptions};
