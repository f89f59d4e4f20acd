//! In-process store
//!
//! Keeps the ledger, the run lock and the executed statements in memory.
//! Clones share state, so several orchestrators built from clones of one
//! `MemoryStore` see the same target. Failures, non-transactional
//! behaviour and slow execution can be simulated.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    classify_failure, ExecutionOutput, Ledger, LedgerWrite, LockGuard, LockHandle, LockManager,
    Procedure, StatementOutcome, StoreAdapter, StoreFailure,
};
use crate::error::{MigrateError, MigrateResult};
use crate::migrations::definitions::LedgerEntry;

#[derive(Debug, Default)]
struct State {
    ledger_ready: bool,
    ledger: BTreeMap<String, LedgerEntry>,
    executed: Vec<String>,
    locked: bool,
    transactional: bool,
    delay: Option<Duration>,
    fail_on: Vec<String>,
    fail_ledger_writes: bool,
    rows_affected: u64,
}

#[derive(Debug)]
struct Inner {
    target: String,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                target: target.into(),
                state: Mutex::new(State {
                    transactional: true,
                    ..State::default()
                }),
            }),
        }
    }

    /// Behave like a store without transactional DDL
    pub fn set_transactional(&self, transactional: bool) {
        self.inner.state().transactional = transactional;
    }

    /// Sleep before executing each procedure
    pub fn set_delay(&self, delay: Duration) {
        self.inner.state().delay = Some(delay);
    }

    /// Fail any statement containing `pattern`
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.inner.state().fail_on.push(pattern.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.inner.state();
        state.fail_on.clear();
        state.fail_ledger_writes = false;
    }

    /// Fail ledger writes that accompany a procedure
    pub fn fail_ledger_writes(&self) {
        self.inner.state().fail_ledger_writes = true;
    }

    /// Row count reported for every statement
    pub fn set_rows_affected(&self, rows: u64) {
        self.inner.state().rows_affected = rows;
    }

    /// Statements that took effect, in order
    pub fn executed(&self) -> Vec<String> {
        self.inner.state().executed.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.state().locked
    }

    pub fn ledger_snapshot(&self) -> Vec<LedgerEntry> {
        self.inner.state().ledger.values().cloned().collect()
    }

    fn apply_write(state: &mut State, write: &LedgerWrite) {
        match write {
            LedgerWrite::Record { id, checksum, batch } => {
                state.ledger.insert(
                    id.clone(),
                    LedgerEntry {
                        id: id.clone(),
                        checksum: checksum.clone(),
                        batch: *batch,
                        applied_at: Utc::now(),
                    },
                );
            }
            LedgerWrite::Unrecord { id } => {
                state.ledger.remove(id);
            }
        }
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    fn target(&self) -> &str {
        &self.inner.target
    }

    fn is_transactional(&self) -> bool {
        self.inner.state().transactional
    }

    async fn execute(
        &self,
        procedure: &Procedure,
        write: &LedgerWrite,
    ) -> Result<ExecutionOutput, StoreFailure> {
        let delay = self.inner.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.state();
        if !state.ledger_ready {
            return Err(StoreFailure::Clean("ledger has not been created".to_string()));
        }

        let atomic = state.transactional && procedure.transactional;
        let mut output = ExecutionOutput::default();
        let mut staged = Vec::new();

        for (index, statement) in procedure.statements.iter().enumerate() {
            if state.fail_on.iter().any(|p| statement.contains(p.as_str())) {
                let message = format!("simulated failure in `{}`", statement);
                if !atomic {
                    state.executed.extend(staged);
                }
                return Err(classify_failure(atomic, index, message));
            }
            staged.push(statement.clone());
            output.statements.push(StatementOutcome {
                statement: statement.clone(),
                rows_affected: state.rows_affected,
            });
        }

        if state.fail_ledger_writes {
            let message = format!("simulated ledger write failure for {}", write.id());
            if !atomic {
                let ran = staged.len();
                state.executed.extend(staged);
                return Err(classify_failure(false, ran, message));
            }
            return Err(StoreFailure::Clean(message));
        }

        state.executed.extend(staged);
        Self::apply_write(&mut state, write);
        Ok(output)
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn ensure(&self) -> MigrateResult<()> {
        self.inner.state().ledger_ready = true;
        Ok(())
    }

    async fn exists(&self) -> MigrateResult<bool> {
        Ok(self.inner.state().ledger_ready)
    }

    async fn entries(&self) -> MigrateResult<Vec<LedgerEntry>> {
        let state = self.inner.state();
        if !state.ledger_ready {
            return Err(MigrateError::config("Ledger has not been created"));
        }
        Ok(state.ledger.values().cloned().collect())
    }

    async fn record(&self, id: &str, checksum: &str, batch: i64) -> MigrateResult<()> {
        let write = LedgerWrite::Record {
            id: id.to_string(),
            checksum: checksum.to_string(),
            batch,
        };
        Self::apply_write(&mut self.inner.state(), &write);
        Ok(())
    }

    async fn unrecord(&self, id: &str) -> MigrateResult<()> {
        let write = LedgerWrite::Unrecord { id: id.to_string() };
        Self::apply_write(&mut self.inner.state(), &write);
        Ok(())
    }
}

struct MemoryLock {
    inner: Arc<Inner>,
}

#[async_trait]
impl LockHandle for MemoryLock {
    async fn release(self: Box<Self>) -> MigrateResult<()> {
        // Drop frees the lock
        Ok(())
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        self.inner.state().locked = false;
    }
}

#[async_trait]
impl LockManager for MemoryStore {
    fn lock_scope(&self) -> String {
        self.inner.target.clone()
    }

    async fn try_acquire(&self) -> MigrateResult<Option<LockGuard>> {
        let mut state = self.inner.state();
        if state.locked {
            return Ok(None);
        }
        state.locked = true;
        drop(state);

        Ok(Some(LockGuard::new(
            self.inner.target.clone(),
            Box::new(MemoryLock {
                inner: self.inner.clone(),
            }),
        )))
    }
}
