//! Store Backend Traits
//!
//! The orchestrator never talks to a database directly. It sees a target
//! store through three capabilities: executing a migration procedure
//! ([`StoreAdapter`]), reading and writing the applied-state ledger
//! ([`Ledger`]) and taking the store-scoped run lock ([`LockManager`]).
//! A [`Store`] is anything that provides all three.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod ledger;
pub mod lock;
pub mod memory;
pub mod postgres;

pub use ledger::Ledger;
pub use lock::{LockGuard, LockHandle, LockManager};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// One executable unit of work produced by a dialect: an ordered list of
/// statements, optionally wrapped in a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub statements: Vec<String>,
    pub transactional: bool,
}

impl Procedure {
    pub fn new(statements: Vec<String>) -> Self {
        Self {
            statements,
            transactional: true,
        }
    }

    pub fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.statements.iter().all(|s| s.trim().is_empty())
    }
}

/// Ledger change committed alongside a procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerWrite {
    Record {
        id: String,
        checksum: String,
        batch: i64,
    },
    Unrecord {
        id: String,
    },
}

impl LedgerWrite {
    pub fn id(&self) -> &str {
        match self {
            LedgerWrite::Record { id, .. } | LedgerWrite::Unrecord { id } => id,
        }
    }
}

/// Per-statement outcome reported by a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementOutcome {
    pub statement: String,
    pub rows_affected: u64,
}

/// Everything a store reports back about a successful execution; dialects
/// inspect it to raise execution warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub statements: Vec<StatementOutcome>,
}

/// Why a procedure did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFailure {
    /// Nothing was changed: the transaction rolled back, or the first
    /// statement failed on its own.
    Clean(String),
    /// The store may hold partial, unrecorded changes.
    Unverified(String),
}

impl std::fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreFailure::Clean(msg) | StoreFailure::Unverified(msg) => f.write_str(msg),
        }
    }
}

/// Execution capability of a target store
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Identity of the target store; the lock scope and the log label
    fn target(&self) -> &str;

    /// Whether the store can run a single procedure atomically
    fn is_transactional(&self) -> bool;

    /// Run `procedure` and apply `write` to the ledger. When the procedure
    /// is transactional and the store supports it, both commit together.
    async fn execute(
        &self,
        procedure: &Procedure,
        write: &LedgerWrite,
    ) -> Result<ExecutionOutput, StoreFailure>;
}

/// A complete target store: executor, ledger and lock manager
pub trait Store: StoreAdapter + Ledger + LockManager {}

impl<T: StoreAdapter + Ledger + LockManager> Store for T {}

/// Classify a failure that happened after `executed` statements already ran
/// outside a transaction.
pub(crate) fn classify_failure(transactional: bool, executed: usize, message: String) -> StoreFailure {
    if transactional || executed == 0 {
        StoreFailure::Clean(message)
    } else {
        StoreFailure::Unverified(format!(
            "{} (after {} statement(s) had already run outside a transaction)",
            message, executed
        ))
    }
}
