//! # mariner: schema migrations for mariner projects
//!
//! Discovers ordered migration files, applies or reverts them against a
//! target store and keeps a ledger of what was applied in which batch.
//!
//! This crate provides the migration orchestrator, the dialect plugins that
//! turn migration files into executable procedures, and the store backends
//! (PostgreSQL, plus an in-memory store for tests and dry runs).

pub mod config;
pub mod dialect;
pub mod error;
pub mod migrations;
pub mod store;

pub use config::{ChecksumPolicy, LockConfig, LockMode, MigrateConfig};
pub use dialect::{Dialect, DialectRegistry, MigrationOperation};
pub use error::{MigrateError, MigrateResult, Progress};
pub use migrations::{
    CreateOptions, Direction, MigrationManager, MigrationStatus, Orchestrator, RunRequest,
    RunResult, StatusReport,
};
pub use store::{MemoryStore, PostgresStore, Store};
