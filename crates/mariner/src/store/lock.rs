//! Store-scoped run lock
//!
//! At most one run may be in flight against a target store. The lock is
//! keyed by the store identity, so two migration directories pointed at the
//! same database still serialize.

use async_trait::async_trait;
use std::time::Instant;

use crate::config::LockMode;
use crate::error::{MigrateError, MigrateResult};

/// Backend-specific part of a held lock.
///
/// `release` is the orderly path. Implementations must also free the lock
/// when dropped without being released, which is what happens when a run
/// future is cancelled.
#[async_trait]
pub trait LockHandle: Send {
    async fn release(self: Box<Self>) -> MigrateResult<()>;
}

/// Exclusive run lock, released on every exit path
pub struct LockGuard {
    scope: String,
    handle: Option<Box<dyn LockHandle>>,
}

impl LockGuard {
    pub fn new(scope: impl Into<String>, handle: Box<dyn LockHandle>) -> Self {
        Self {
            scope: scope.into(),
            handle: Some(handle),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub async fn release(mut self) -> MigrateResult<()> {
        match self.handle.take() {
            Some(handle) => {
                tracing::debug!("Releasing migration lock for {}", self.scope);
                handle.release().await
            }
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::warn!(
                "Migration lock for {} dropped without release; freeing it",
                self.scope
            );
            drop(handle);
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("scope", &self.scope)
            .field("held", &self.handle.is_some())
            .finish()
    }
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Identity the lock is scoped to
    fn lock_scope(&self) -> String;

    /// Take the lock if it is free; `None` when another run holds it
    async fn try_acquire(&self) -> MigrateResult<Option<LockGuard>>;

    /// Take the lock, failing fast or polling according to `mode`
    async fn acquire(&self, mode: LockMode) -> MigrateResult<LockGuard> {
        let started = Instant::now();
        let mut announced = false;

        loop {
            if let Some(guard) = self.try_acquire().await? {
                tracing::debug!("Acquired migration lock for {}", guard.scope());
                return Ok(guard);
            }

            match mode {
                LockMode::FailFast => {
                    return Err(MigrateError::LockHeld {
                        target: self.lock_scope(),
                    });
                }
                LockMode::Wait {
                    timeout,
                    poll_interval,
                } => {
                    if started.elapsed() >= timeout {
                        return Err(MigrateError::LockHeld {
                            target: self.lock_scope(),
                        });
                    }
                    if !announced {
                        tracing::warn!(
                            "Migration lock for {} is held by another run, waiting up to {:?}",
                            self.lock_scope(),
                            timeout
                        );
                        announced = true;
                    }
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}
