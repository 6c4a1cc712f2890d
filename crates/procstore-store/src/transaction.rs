// ABOUTME: Handle passed to StorageManager::transaction callbacks.
// ABOUTME: Runs store writes on the already-open transaction so several of them commit or roll back together.

use std::cell::Cell;
use std::ops::Deref;

use procstore_core::{ClearedCount, ProcessLog, SimpleError};
use rusqlite::{Connection, Transaction};

use crate::error::{StorageError, StorageResult};
use crate::error_store;
use crate::log_store::{self, LogStorage};

/// Store operations bound to one open transaction on the error store's
/// connection.
///
/// Log operations are only available when the log store shares that
/// connection; otherwise they fail with [`StorageError::SeparateLogStore`].
/// Raw SQL is available through `Deref<Target = Connection>`.
pub struct StoreTransaction<'a> {
    tx: &'a Transaction<'a>,
    logs: Option<&'a LogStorage>,
    next_sequence: Cell<i64>,
}

impl<'a> StoreTransaction<'a> {
    pub(crate) fn new(tx: &'a Transaction<'a>, logs: Option<&'a LogStorage>) -> Self {
        Self {
            tx,
            logs,
            next_sequence: Cell::new(logs.map_or(0, LogStorage::next_sequence)),
        }
    }

    /// Record an error occurrence inside this transaction.
    pub fn store_error(
        &self,
        instance_id: &str,
        process_id: &str,
        error: &SimpleError,
    ) -> StorageResult<bool> {
        error_store::record_occurrence(self.tx, instance_id, process_id, error)
    }

    pub fn clear_errors(&self, instance_id: &str) -> StorageResult<ClearedCount> {
        error_store::delete_instance(self.tx, instance_id)
    }

    /// Insert a batch of logs inside this transaction and return their
    /// sequences. The store's counter only moves once the transaction commits.
    pub fn store_logs(&self, logs: &[ProcessLog]) -> StorageResult<Vec<i64>> {
        if self.logs.is_none() {
            return Err(StorageError::SeparateLogStore);
        }
        let first = self.next_sequence.get();
        let sequences = log_store::insert_batch(self.tx, first, logs)?;
        self.next_sequence.set(first + sequences.len() as i64);
        Ok(sequences)
    }

    pub fn clear_logs(&self, instance_id: &str) -> StorageResult<ClearedCount> {
        if self.logs.is_none() {
            return Err(StorageError::SeparateLogStore);
        }
        log_store::delete_instance(self.tx, instance_id)
    }

    /// Counter value the log store should move to once this transaction
    /// commits, or `None` when logs cannot be written here.
    pub(crate) fn pending_sequence(&self) -> Option<i64> {
        self.logs.map(|_| self.next_sequence.get())
    }
}

impl Deref for StoreTransaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.tx
    }
}
