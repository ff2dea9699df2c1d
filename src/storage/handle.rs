//! Shared store handle
//!
//! The orchestrator and the link-graph builder reach the store through one
//! [`StoreHandle`]. Every call locks the store for one synchronous operation
//! and is retried by the handle's [`RetryPolicy`]; the lock is never held
//! across an `.await`.

use crate::storage::retry::{with_retry, RetryPolicy};
use crate::storage::sqlite::SqliteStorage;
use crate::storage::traits::{StorageError, StorageResult};
use crate::RippleError;
use std::sync::{Arc, Mutex};

/// Cloneable, retrying access to the frontier store
#[derive(Clone)]
pub struct StoreHandle {
    storage: Arc<Mutex<SqliteStorage>>,
    policy: RetryPolicy,
}

impl StoreHandle {
    pub fn new(storage: SqliteStorage, policy: RetryPolicy) -> Self {
        Self {
            storage: Arc::new(Mutex::new(storage)),
            policy,
        }
    }

    /// Runs `op` against the store, retrying transient failures
    ///
    /// # Arguments
    /// * `what` - Short operation name used in log lines
    /// * `op` - One store call; may run several times
    pub async fn with<T, F>(&self, what: &str, mut op: F) -> Result<T, RippleError>
    where
        F: FnMut(&mut SqliteStorage) -> StorageResult<T>,
    {
        with_retry(self.policy, what, || {
            let mut storage = self
                .storage
                .lock()
                .map_err(|_| StorageError::LockPoisoned)?;
            op(&mut storage)
        })
        .await
    }
}
