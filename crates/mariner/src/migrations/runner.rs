//! Migration Runner - Orchestrates runs against a target store
//!
//! A run takes the store-scoped lock, reconciles the migrations on disk with
//! the ledger, parses every candidate up front and then executes them one at
//! a time, committing each procedure together with its ledger update.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::definitions::{
    ChecksumDrift, Direction, ItemReport, LedgerEntry, MigrationStatus, MigrationWarning,
    RunRequest, RunResult, StatusEntry, StatusReport,
};
use super::manager::{LoadedMigration, Migration, MigrationManager};
use super::rollback::plan_rollback;
use super::state::{Lifecycle, LifecycleEvent};
use super::template::CreateOptions;
use crate::config::{ChecksumPolicy, MigrateConfig};
use crate::dialect::DialectRegistry;
use crate::error::{MigrateError, MigrateResult, Progress};
use crate::store::{LedgerWrite, PostgresStore, Store, StoreFailure};

/// Runs migrations from one directory against one target store
pub struct Orchestrator {
    config: MigrateConfig,
    manager: MigrationManager,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("directory", &self.manager.directory())
            .field("target", &self.store.target())
            .finish()
    }
}

impl Orchestrator {
    /// Build an orchestrator with the dialects named in `config.plugins`
    pub fn init(config: MigrateConfig, store: Arc<dyn Store>) -> MigrateResult<Self> {
        config.validate()?;
        let registry = DialectRegistry::from_names(&config.plugins)?;
        Self::with_registry(config, store, registry)
    }

    /// Build an orchestrator with a caller-assembled dialect registry
    pub fn with_registry(
        config: MigrateConfig,
        store: Arc<dyn Store>,
        registry: DialectRegistry,
    ) -> MigrateResult<Self> {
        config.validate()?;
        let manager = MigrationManager::new(config.directory.clone(), registry)?;
        tracing::debug!(
            "Migration orchestrator ready: {} -> {}",
            manager.directory().display(),
            store.target()
        );
        Ok(Self {
            config,
            manager,
            store,
        })
    }

    /// Connect to the PostgreSQL database named by the configuration
    pub async fn connect(config: MigrateConfig) -> MigrateResult<Self> {
        config.validate()?;
        let url = config.database_url()?;
        let store = PostgresStore::connect(&url, &config.migrations_table).await?;
        Self::init(config, Arc::new(store))
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    pub fn manager(&self) -> &MigrationManager {
        &self.manager
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create new migration file(s) from the dialect template
    pub fn create(&self, name: &str, options: &CreateOptions) -> MigrateResult<Vec<PathBuf>> {
        self.manager.create_migration(name, options)
    }

    /// Apply or revert migrations
    pub async fn run(&self, direction: Direction, count: Option<u32>) -> MigrateResult<RunResult> {
        self.run_request(RunRequest::new(direction, count)?).await
    }

    /// Apply every pending migration
    pub async fn run_migrations(&self) -> MigrateResult<RunResult> {
        self.run_request(RunRequest::up()).await
    }

    pub async fn run_request(&self, request: RunRequest) -> MigrateResult<RunResult> {
        let guard = self.store.acquire(self.config.lock_mode()).await?;
        tracing::debug!("Holding migration lock for {}", guard.scope());

        let outcome = self.run_locked(request).await;

        if let Err(e) = guard.release().await {
            // The backend frees the lock when its session goes away
            tracing::warn!("Failed to release migration lock cleanly: {}", e);
        }
        outcome
    }

    /// Current state of every migration. Read-only: takes no lock and
    /// treats a ledger that was never created as empty.
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let migrations = self.manager.load_migrations()?;
        let entries = if self.store.exists().await? {
            self.store.entries().await?
        } else {
            Vec::new()
        };

        let mut recorded: HashMap<&str, &LedgerEntry> =
            entries.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut report = StatusReport::default();
        for migration in &migrations {
            let entry = match recorded.remove(migration.id()) {
                Some(entry) => StatusEntry {
                    id: migration.id().to_string(),
                    extension: migration.descriptor.extension.clone(),
                    status: MigrationStatus::Applied {
                        applied_at: entry.applied_at,
                        batch: entry.batch,
                    },
                    checksum_changed: migration.checksum()? != entry.checksum,
                },
                None => StatusEntry {
                    id: migration.id().to_string(),
                    extension: migration.descriptor.extension.clone(),
                    status: MigrationStatus::Pending,
                    checksum_changed: false,
                },
            };
            report.migrations.push(entry);
        }

        report.missing = entries
            .iter()
            .filter(|e| recorded.contains_key(e.id.as_str()))
            .cloned()
            .collect();
        Ok(report)
    }

    async fn run_locked(&self, request: RunRequest) -> MigrateResult<RunResult> {
        let start_time = Instant::now();
        let direction = request.direction;
        let mut result = RunResult::empty(direction);

        self.store.ensure().await?;
        let migrations = self.manager.load_migrations()?;
        let entries = self.store.entries().await?;

        let by_id: HashMap<&str, &Migration> = migrations.iter().map(|m| (m.id(), m)).collect();

        let missing: Vec<String> = entries
            .iter()
            .filter(|e| !by_id.contains_key(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();
        if !missing.is_empty() {
            if direction == Direction::Down {
                return Err(MigrateError::MissingMigration { ids: missing });
            }
            tracing::warn!(
                "Applied migrations have no file in {}: {}",
                self.manager.directory().display(),
                missing.join(", ")
            );
        }

        result.checksum_mismatches = self.verify_checksums(&entries, &by_id)?;

        let candidates = match direction {
            Direction::Up => Self::plan_up(&migrations, &entries, request.count),
            Direction::Down => plan_rollback(&entries, &by_id, request.count),
        };
        if candidates.is_empty() {
            tracing::info!("Nothing to migrate {} on {}", direction, self.store.target());
            result.elapsed_ms = start_time.elapsed().as_millis();
            return Ok(result);
        }

        // Parse everything before touching the store
        let mut loaded = Vec::with_capacity(candidates.len());
        for migration in candidates {
            let item = migration.load()?;
            if item.operation.procedure(direction).is_none() {
                return Err(MigrateError::Irreversible { id: item.id });
            }
            loaded.push((migration, item));
        }

        let batch = match direction {
            Direction::Up => Some(self.store.next_batch_number().await?),
            Direction::Down => None,
        };
        result.batch = batch;

        let total = loaded.len();
        for (index, (migration, item)) in loaded.iter().enumerate() {
            let warnings = self.execute_one(migration, item, direction, batch, &mut result).await?;

            if !warnings.is_empty() && self.config.stop_on_warning && index + 1 < total {
                tracing::warn!(
                    "Stopping after {} because it reported a warning; {} migration(s) left",
                    item.id,
                    total - index - 1
                );
                result.partial = true;
                break;
            }
        }

        result.elapsed_ms = start_time.elapsed().as_millis();
        match (direction, result.batch) {
            (Direction::Up, Some(batch)) => tracing::info!(
                "Applied {} migration(s) in batch {} ({}ms)",
                result.migrations.len(),
                batch,
                result.elapsed_ms
            ),
            _ => tracing::info!(
                "Reverted {} migration(s) ({}ms)",
                result.migrations.len(),
                result.elapsed_ms
            ),
        }
        Ok(result)
    }

    /// Execute one candidate and fold its outcome into `result`. Returns the
    /// warnings the migration reported.
    async fn execute_one(
        &self,
        migration: &Migration,
        item: &LoadedMigration,
        direction: Direction,
        batch: Option<i64>,
        result: &mut RunResult,
    ) -> MigrateResult<Vec<String>> {
        let procedure = item
            .operation
            .procedure(direction)
            .ok_or_else(|| MigrateError::Irreversible { id: item.id.clone() })?;

        let write = match (direction, batch) {
            (Direction::Up, Some(batch)) => LedgerWrite::Record {
                id: item.id.clone(),
                checksum: item.checksum.clone(),
                batch,
            },
            (Direction::Up, None) => {
                return Err(MigrateError::config("Up run has no batch number"));
            }
            (Direction::Down, _) => LedgerWrite::Unrecord { id: item.id.clone() },
        };

        let mut lifecycle = Lifecycle::new(item.id.clone(), direction);
        lifecycle.advance(LifecycleEvent::Start(direction))?;
        match direction {
            Direction::Up => tracing::info!("Applying migration: {}", item.id),
            Direction::Down => tracing::info!("Reverting migration: {}", item.id),
        }
        if !procedure.transactional || !self.store.is_transactional() {
            tracing::warn!(
                "{} runs outside a transaction; a failure may leave partial changes",
                item.id
            );
        }

        let output = match self.store.execute(procedure, &write).await {
            Ok(output) => output,
            Err(failure) => {
                lifecycle.advance(LifecycleEvent::Fail)?;
                result.items.push(ItemReport {
                    id: item.id.clone(),
                    state: lifecycle.state(),
                });
                let progress = Progress(result.migrations.clone());
                tracing::error!("Migration {} failed: {} ({})", item.id, failure, progress);
                return Err(match failure {
                    StoreFailure::Clean(message) => MigrateError::StoreExecution {
                        id: item.id.clone(),
                        message,
                        progress,
                    },
                    StoreFailure::Unverified(message) => MigrateError::UnverifiedState {
                        id: item.id.clone(),
                        message,
                        progress,
                    },
                });
            }
        };

        let state = lifecycle.advance(LifecycleEvent::Succeed)?;
        result.migrations.push(item.id.clone());
        result.items.push(ItemReport {
            id: item.id.clone(),
            state,
        });

        let mut warnings: Vec<String> = item
            .operation
            .warnings_for(direction)
            .map(str::to_string)
            .collect();
        warnings.extend(migration.dialect.execution_warning(&output));
        for message in &warnings {
            tracing::warn!("{}: {}", item.id, message);
            result.warnings.push(MigrationWarning {
                id: item.id.clone(),
                message: message.clone(),
            });
        }
        Ok(warnings)
    }

    /// Compare recorded checksums with the files on disk
    fn verify_checksums(
        &self,
        entries: &[LedgerEntry],
        by_id: &HashMap<&str, &Migration>,
    ) -> MigrateResult<Vec<ChecksumDrift>> {
        let mut drift = Vec::new();
        for entry in entries {
            let Some(migration) = by_id.get(entry.id.as_str()) else {
                continue;
            };
            let current = migration.checksum()?;
            if current != entry.checksum {
                tracing::warn!(
                    "Migration {} changed after it was applied (recorded {}, now {})",
                    entry.id,
                    entry.checksum,
                    current
                );
                drift.push(ChecksumDrift {
                    id: entry.id.clone(),
                    recorded: entry.checksum.clone(),
                    current,
                });
            }
        }

        if self.config.checksum_policy == ChecksumPolicy::Error {
            if let Some(first) = drift.into_iter().next() {
                return Err(MigrateError::ChecksumMismatch {
                    id: first.id,
                    recorded: first.recorded,
                    current: first.current,
                });
            }
            return Ok(Vec::new());
        }
        Ok(drift)
    }

    /// Pending migrations in ascending id order, at most `count` of them
    fn plan_up<'a>(
        migrations: &'a [Migration],
        entries: &[LedgerEntry],
        count: Option<u32>,
    ) -> Vec<&'a Migration> {
        let applied: BTreeSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let pending = migrations.iter().filter(|m| !applied.contains(m.id()));
        match count {
            Some(n) => pending.take(n as usize).collect(),
            None => pending.collect(),
        }
    }
}
