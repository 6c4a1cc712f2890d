// ABOUTME: Storage manager facade over the error and log stores.
// ABOUTME: Owns connection lifecycle, retries mutations, and keeps panics from crossing the public API.

use std::sync::{Mutex, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use procstore_core::{
    ClearedCount, ErrorRow, ErrorSummary, LogCursor, LogFilter, LogRetrievalResponse,
    LogStatsSummary, ProcessLog, SimpleError,
};
use rusqlite::TransactionBehavior;

use crate::config::StoreConfig;
use crate::connection::{
    ConnectionOwnership, SharedConnection, lock, open_connection, release, resolve_store_path,
};
use crate::error::{StorageError, StorageResult};
use crate::error_store::ErrorStorage;
use crate::log_store::LogStorage;
use crate::retry::{RetryPolicy, guard};
use crate::transaction::StoreTransaction;

/// Rows removed by one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub errors_removed: usize,
    pub logs_removed: usize,
}

struct Stores {
    errors: ErrorStorage,
    logs: LogStorage,
    error_conn: SharedConnection,
    log_conn: SharedConnection,
    log_ownership: ConnectionOwnership,
}

/// Single entry point for collaborators.
///
/// Mutations go through the configured [`RetryPolicy`]; reads run once. Every
/// call is wrapped so that a panic surfaces as [`StorageError::Internal`].
/// After [`close`](Self::close) every call fails with [`StorageError::Closed`].
pub struct StorageManager {
    stores: RwLock<Option<Stores>>,
    retry: RetryPolicy,
    transaction_thread: Mutex<Option<ThreadId>>,
}

/// Marks the current thread as running a transaction callback until dropped.
struct TransactionOwner<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> TransactionOwner<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
        Self(slot)
    }
}

impl Drop for TransactionOwner<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl StorageManager {
    /// Open the stores described by `config`.
    ///
    /// When both paths name the same file the log store shares the error
    /// store's connection. Failure to create or open a file is returned
    /// immediately.
    pub fn open(config: &StoreConfig) -> StorageResult<Self> {
        let error_path = resolve_store_path(&config.error_db_path)?;
        let log_path = resolve_store_path(&config.log_db_path)?;

        let error_conn = open_connection(&error_path)?;
        let (log_conn, log_ownership) = if error_path == log_path {
            (error_conn.clone(), ConnectionOwnership::Shared)
        } else {
            (open_connection(&log_path)?, ConnectionOwnership::Exclusive)
        };

        let errors = ErrorStorage::new(error_conn.clone())?;
        let logs = LogStorage::new(log_conn.clone())?;
        tracing::info!(
            "storage manager opened (errors: {}, logs: {}, {:?} connection)",
            error_path.display(),
            log_path.display(),
            log_ownership
        );

        Ok(Self {
            stores: RwLock::new(Some(Stores {
                errors,
                logs,
                error_conn,
                log_conn,
                log_ownership,
            })),
            retry: RetryPolicy::new(config.max_retries),
            transaction_thread: Mutex::new(None),
        })
    }

    /// Whether the calling thread is inside one of this manager's
    /// transaction callbacks.
    fn in_transaction(&self) -> bool {
        *self
            .transaction_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }

    fn with_stores<T>(&self, f: impl FnOnce(&Stores) -> StorageResult<T>) -> StorageResult<T> {
        if self.in_transaction() {
            return Err(StorageError::Reentrant);
        }
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        match stores.as_ref() {
            Some(stores) => f(stores),
            None => Err(StorageError::Closed),
        }
    }

    // -- errors --

    /// Record an error occurrence. Returns `true` if it was the first
    /// occurrence of its fingerprint on this instance.
    pub fn store_error(
        &self,
        instance_id: &str,
        process_id: &str,
        error: &SimpleError,
    ) -> StorageResult<bool> {
        self.retry.run("store_error", || {
            self.with_stores(|s| s.errors.store_error(instance_id, process_id, error))
        })
    }

    pub fn get_errors(&self, instance_id: &str) -> StorageResult<Vec<ErrorRow>> {
        guard("get_errors", || {
            self.with_stores(|s| s.errors.get_errors(instance_id))
        })
    }

    pub fn get_error_summary(&self, instance_id: &str) -> StorageResult<ErrorSummary> {
        guard("get_error_summary", || {
            self.with_stores(|s| s.errors.get_error_summary(instance_id))
        })
    }

    pub fn clear_errors(&self, instance_id: &str) -> StorageResult<ClearedCount> {
        guard("clear_errors", || {
            self.with_stores(|s| s.errors.clear_errors(instance_id))
        })
    }

    pub fn cleanup_old_errors(&self, retention_days: u32) -> StorageResult<usize> {
        self.retry.run("cleanup_old_errors", || {
            self.with_stores(|s| s.errors.cleanup_old_errors(retention_days))
        })
    }

    // -- logs --

    /// Store a batch of logs atomically. Returns the assigned sequences in
    /// input order.
    pub fn store_logs(&self, logs: &[ProcessLog]) -> StorageResult<Vec<i64>> {
        self.retry
            .run("store_logs", || self.with_stores(|s| s.logs.store_logs(logs)))
    }

    pub fn get_logs(&self, filter: &LogFilter) -> StorageResult<LogRetrievalResponse> {
        guard("get_logs", || self.with_stores(|s| s.logs.get_logs(filter)))
    }

    pub fn get_logs_since(
        &self,
        cursor: &LogCursor,
        limit: i64,
    ) -> StorageResult<LogRetrievalResponse> {
        guard("get_logs_since", || {
            self.with_stores(|s| s.logs.get_logs_since(cursor, limit))
        })
    }

    pub fn clear_logs(&self, instance_id: &str) -> StorageResult<ClearedCount> {
        guard("clear_logs", || {
            self.with_stores(|s| s.logs.clear_logs(instance_id))
        })
    }

    pub fn get_log_stats(&self, instance_id: &str) -> StorageResult<LogStatsSummary> {
        guard("get_log_stats", || {
            self.with_stores(|s| s.logs.get_log_stats(instance_id))
        })
    }

    pub fn cleanup_old_logs(&self, retention_hours: u32) -> StorageResult<usize> {
        self.retry.run("cleanup_old_logs", || {
            self.with_stores(|s| s.logs.cleanup_old_logs(retention_hours))
        })
    }

    pub fn last_log_sequence(&self) -> StorageResult<i64> {
        self.with_stores(|s| Ok(s.logs.last_sequence()))
    }

    /// Run both retention sweeps with the windows from `config`.
    pub fn run_retention(&self, config: &StoreConfig) -> StorageResult<RetentionReport> {
        Ok(RetentionReport {
            errors_removed: self.cleanup_old_errors(config.error_retention_days)?,
            logs_removed: self.cleanup_old_logs(config.log_retention_hours)?,
        })
    }

    // -- lifecycle --

    /// Run `f` atomically on the error store's connection. Not retried.
    ///
    /// Writes made through the [`StoreTransaction`] handle commit together
    /// when `f` returns `Ok` and roll back together otherwise. Log writes are
    /// only accepted when both stores share one file. Calling back into this
    /// manager from `f` fails with [`StorageError::Reentrant`].
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&StoreTransaction<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        guard("transaction", || {
            self.with_stores(|s| {
                let logs = match s.log_ownership {
                    ConnectionOwnership::Shared => Some(&s.logs),
                    ConnectionOwnership::Exclusive => None,
                };

                let mut conn = lock(&s.error_conn);
                let _owner = TransactionOwner::enter(&self.transaction_thread);
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let handle = StoreTransaction::new(&tx, logs);
                let value = f(&handle)?;
                let pending = handle.pending_sequence();
                tx.commit()?;

                // Still holding the connection, so no batch can observe the old counter.
                if let Some(next) = pending {
                    s.logs.advance_to(next);
                }
                Ok(value)
            })
        })
    }

    /// Release both connections. A shared connection is closed once; calling
    /// this again is a no-op.
    pub fn close(&self) {
        if self.in_transaction() {
            tracing::warn!("close called from inside a transaction; ignoring");
            return;
        }
        let taken = self
            .stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(stores) = taken else {
            return;
        };

        let Stores {
            errors,
            logs,
            error_conn,
            log_conn,
            log_ownership,
        } = stores;
        drop(errors);
        drop(logs);

        match log_ownership {
            ConnectionOwnership::Shared => drop(log_conn),
            ConnectionOwnership::Exclusive => release(log_conn),
        }
        release(error_conn);
        tracing::info!("storage manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        self.close();
    }
}
