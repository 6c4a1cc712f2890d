// ABOUTME: Deduplicating error store: one row per (instance, fingerprint), counting occurrences.
// ABOUTME: Reads re-aggregate by fingerprint so accidental duplicate rows still collapse.

use chrono::{Duration, Utc};
use procstore_core::{
    ClearedCount, ErrorRow, ErrorSummary, SimpleError, error_hash, format_timestamp,
    now_timestamp,
};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use crate::connection::{SharedConnection, lock};
use crate::error::StorageResult;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS process_errors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        instance_id TEXT NOT NULL,
        process_id TEXT NOT NULL,
        error_hash TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        level INTEGER NOT NULL,
        message TEXT NOT NULL,
        raw_output TEXT NOT NULL,
        occurrence_count INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE INDEX IF NOT EXISTS idx_process_errors_instance ON process_errors(instance_id);
    CREATE INDEX IF NOT EXISTS idx_process_errors_hash ON process_errors(error_hash);
    CREATE INDEX IF NOT EXISTS idx_process_errors_timestamp ON process_errors(timestamp DESC);
    CREATE INDEX IF NOT EXISTS idx_process_errors_level ON process_errors(level);
";

/// One row per fingerprint. Totals and first-seen time come from the whole
/// group; process, level, message and raw output come from the most recent
/// occurrence.
const SELECT_DEDUPLICATED: &str = "
    WITH grouped AS (
        SELECT error_hash,
               MAX(id) AS id,
               MAX(timestamp) AS timestamp,
               SUM(occurrence_count) AS occurrence_count,
               MIN(created_at) AS created_at
        FROM process_errors
        WHERE instance_id = ?1
        GROUP BY error_hash
    ),
    latest AS (
        SELECT error_hash, process_id, level, message, raw_output,
               ROW_NUMBER() OVER (
                   PARTITION BY error_hash ORDER BY timestamp DESC, id DESC
               ) AS rn
        FROM process_errors
        WHERE instance_id = ?1
    )
    SELECT g.id, l.process_id, g.error_hash, g.timestamp, l.level, l.message,
           l.raw_output, g.occurrence_count, g.created_at
    FROM grouped g
    JOIN latest l ON l.error_hash = g.error_hash AND l.rn = 1
    ORDER BY g.timestamp DESC, g.id DESC
";

/// Error table access bound to one connection.
pub struct ErrorStorage {
    conn: SharedConnection,
}

impl ErrorStorage {
    /// Bind to a connection, creating the error table and indexes if needed.
    pub fn new(conn: SharedConnection) -> StorageResult<Self> {
        lock(&conn).execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Record one occurrence of an error.
    ///
    /// The explicit `instance_id` and `process_id` take precedence over the
    /// ids carried in `error`. Returns `true` when a new row was created and
    /// `false` when the occurrence was folded into an existing row.
    pub fn store_error(
        &self,
        instance_id: &str,
        process_id: &str,
        error: &SimpleError,
    ) -> StorageResult<bool> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = record_occurrence(&tx, instance_id, process_id, error)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// All errors of an instance, one per fingerprint, most recently active first.
    pub fn get_errors(&self, instance_id: &str) -> StorageResult<Vec<ErrorRow>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare_cached(SELECT_DEDUPLICATED)?;
        let rows = stmt.query_map(params![instance_id], |row| error_from_row(instance_id, row))?;

        let mut errors = Vec::new();
        for row in rows {
            errors.push(row?);
        }
        Ok(errors)
    }

    /// Counts over the deduplicated errors of an instance.
    pub fn get_error_summary(&self, instance_id: &str) -> StorageResult<ErrorSummary> {
        let errors = self.get_errors(instance_id)?;
        Ok(ErrorSummary::from_rows(&errors))
    }

    /// Delete every error row of an instance.
    pub fn clear_errors(&self, instance_id: &str) -> StorageResult<ClearedCount> {
        delete_instance(&lock(&self.conn), instance_id)
    }

    /// Delete errors first seen more than `retention_days` days ago.
    pub fn cleanup_old_errors(&self, retention_days: u32) -> StorageResult<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let removed = lock(&self.conn).execute(
            "DELETE FROM process_errors WHERE created_at < ?1",
            params![format_timestamp(cutoff)],
        )?;
        tracing::info!(
            "removed {} error rows older than {} days",
            removed,
            retention_days
        );
        Ok(removed)
    }

    /// Run `f` inside one transaction on this store's connection, committing
    /// only if it returns `Ok`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Fold one occurrence into the newest row with the same fingerprint, or
/// insert a new row. The caller owns the surrounding transaction.
pub(crate) fn record_occurrence(
    conn: &Connection,
    instance_id: &str,
    process_id: &str,
    error: &SimpleError,
) -> StorageResult<bool> {
    let hash = error_hash(&error.message, error.level);
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM process_errors
             WHERE error_hash = ?1 AND instance_id = ?2
             ORDER BY timestamp DESC, id DESC
             LIMIT 1",
            params![hash, instance_id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE process_errors
                 SET occurrence_count = occurrence_count + 1,
                     timestamp = ?1,
                     raw_output = ?2
                 WHERE id = ?3",
                params![error.timestamp, error.raw_output, id],
            )?;
            tracing::debug!("error {} on {} repeated (row {})", hash, instance_id, id);
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO process_errors
                    (instance_id, process_id, error_hash, timestamp, level, message,
                     raw_output, occurrence_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
                params![
                    instance_id,
                    process_id,
                    hash,
                    error.timestamp,
                    error.level,
                    error.message,
                    error.raw_output,
                    now_timestamp(),
                ],
            )?;
            tracing::debug!("new error {} on {}", hash, instance_id);
            Ok(true)
        }
    }
}

pub(crate) fn delete_instance(conn: &Connection, instance_id: &str) -> StorageResult<ClearedCount> {
    let cleared_count = conn.execute(
        "DELETE FROM process_errors WHERE instance_id = ?1",
        params![instance_id],
    )?;
    tracing::info!("cleared {} error rows for {}", cleared_count, instance_id);
    Ok(ClearedCount { cleared_count })
}

fn error_from_row(instance_id: &str, row: &Row<'_>) -> rusqlite::Result<ErrorRow> {
    Ok(ErrorRow {
        id: row.get(0)?,
        instance_id: instance_id.to_string(),
        process_id: row.get(1)?,
        error_hash: row.get(2)?,
        timestamp: row.get(3)?,
        level: row.get(4)?,
        message: row.get(5)?,
        raw_output: row.get(6)?,
        occurrence_count: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    fn make_error(message: &str, level: i32, timestamp: &str) -> SimpleError {
        SimpleError {
            instance_id: "ignored".to_string(),
            process_id: "ignored".to_string(),
            message: message.to_string(),
            level,
            timestamp: timestamp.to_string(),
            raw_output: format!("raw: {message} @ {timestamp}"),
        }
    }

    fn store() -> ErrorStorage {
        ErrorStorage::new(open_in_memory()).unwrap()
    }

    #[test]
    fn repeated_error_collapses_to_one_row() {
        let store = store();
        let err = make_error("database unavailable", 2, "2024-01-01T00:00:00.000Z");

        assert!(store.store_error("a", "p1", &err).unwrap());
        for _ in 0..4 {
            assert!(!store.store_error("a", "p1", &err).unwrap());
        }

        let errors = store.get_errors("a").unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].occurrence_count, 5);
        assert_eq!(errors[0].instance_id, "a");
        assert_eq!(errors[0].process_id, "p1");
    }

    #[test]
    fn ephemeral_port_change_updates_latest_occurrence() {
        let store = store();
        let first = make_error("Connect to 10.0.0.1:54231 failed", 2, "2024-01-01T00:00:00.000Z");
        let second = make_error("Connect to 10.0.0.1:60411 failed", 2, "2024-01-01T00:05:00.000Z");

        store.store_error("a", "p1", &first).unwrap();
        store.store_error("a", "p1", &second).unwrap();

        let errors = store.get_errors("a").unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].occurrence_count, 2);
        assert_eq!(errors[0].timestamp, "2024-01-01T00:05:00.000Z");
        assert_eq!(errors[0].raw_output, second.raw_output);
        // The stored message is the first one seen, never normalized.
        assert_eq!(errors[0].message, "Connect to 10.0.0.1:54231 failed");
    }

    #[test]
    fn instances_never_merge() {
        let store = store();
        let err = make_error("boom", 2, "2024-01-01T00:00:00.000Z");

        store.store_error("a", "p", &err).unwrap();
        store.store_error("b", "p", &err).unwrap();

        assert_eq!(store.get_errors("a").unwrap().len(), 1);
        assert_eq!(store.get_errors("b").unwrap().len(), 1);
        assert_eq!(store.get_errors("a").unwrap()[0].occurrence_count, 1);
    }

    #[test]
    fn level_change_is_a_different_error() {
        let store = store();
        store
            .store_error("a", "p", &make_error("boom", 1, "2024-01-01T00:00:00.000Z"))
            .unwrap();
        store
            .store_error("a", "p", &make_error("boom", 2, "2024-01-01T00:00:01.000Z"))
            .unwrap();

        assert_eq!(store.get_errors("a").unwrap().len(), 2);
    }

    #[test]
    fn errors_are_ordered_most_recent_first() {
        let store = store();
        store
            .store_error("a", "p", &make_error("old", 2, "2024-01-01T00:00:00.000Z"))
            .unwrap();
        store
            .store_error("a", "p", &make_error("new", 2, "2024-01-03T00:00:00.000Z"))
            .unwrap();
        store
            .store_error("a", "p", &make_error("middle", 2, "2024-01-02T00:00:00.000Z"))
            .unwrap();

        let messages: Vec<_> = store
            .get_errors("a")
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["new", "middle", "old"]);
    }

    #[test]
    fn read_path_aggregates_duplicate_rows() {
        let store = store();
        let err = make_error("dup", 2, "2024-01-01T00:00:00.000Z");
        store.store_error("a", "p", &err).unwrap();
        let hash = error_hash("dup", 2);

        // Simulate a duplicate that slipped past the write path.
        store
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO process_errors
                        (instance_id, process_id, error_hash, timestamp, level, message,
                         raw_output, occurrence_count, created_at)
                     VALUES ('a', 'p2', ?1, '2024-02-01T00:00:00.000Z', 2, 'dup',
                             'latest raw', 3, '2000-01-01T00:00:00.000Z')",
                    params![hash],
                )?;
                Ok(())
            })
            .unwrap();

        let errors = store.get_errors("a").unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].occurrence_count, 4);
        assert_eq!(errors[0].timestamp, "2024-02-01T00:00:00.000Z");
        assert_eq!(errors[0].raw_output, "latest raw");
        assert_eq!(errors[0].process_id, "p2");
        assert_eq!(errors[0].created_at, "2000-01-01T00:00:00.000Z");
    }

    #[test]
    fn summary_reports_totals_and_bounds() {
        let store = store();
        let a = make_error("a", 2, "2024-01-01T00:00:00.000Z");
        let b = make_error("b", 3, "2024-01-05T00:00:00.000Z");
        store.store_error("i", "p", &a).unwrap();
        store.store_error("i", "p", &a).unwrap();
        store.store_error("i", "p", &b).unwrap();

        let summary = store.get_error_summary("i").unwrap();
        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.unique_errors, 2);
        assert_eq!(summary.repeated_errors, 1);
        assert_eq!(summary.errors_by_level.get(&2), Some(&2));
        assert_eq!(summary.errors_by_level.get(&3), Some(&1));
        assert_eq!(summary.latest_error.as_deref(), Some("2024-01-05T00:00:00.000Z"));
        assert_eq!(summary.oldest_error.as_deref(), Some("2024-01-01T00:00:00.000Z"));
    }

    #[test]
    fn summary_of_unknown_instance_is_empty() {
        let summary = store().get_error_summary("nobody").unwrap();
        assert_eq!(summary, ErrorSummary::default());
    }

    #[test]
    fn clear_reports_prior_count_then_zero() {
        let store = store();
        store
            .store_error("a", "p", &make_error("x", 2, "2024-01-01T00:00:00.000Z"))
            .unwrap();
        store
            .store_error("a", "p", &make_error("y", 2, "2024-01-01T00:00:00.000Z"))
            .unwrap();
        store
            .store_error("b", "p", &make_error("x", 2, "2024-01-01T00:00:00.000Z"))
            .unwrap();

        assert_eq!(store.clear_errors("a").unwrap().cleared_count, 2);
        assert_eq!(store.clear_errors("a").unwrap().cleared_count, 0);
        assert_eq!(store.get_errors("b").unwrap().len(), 1);
    }

    #[test]
    fn cleanup_removes_only_old_rows() {
        let store = store();
        store
            .store_error("a", "p", &make_error("fresh", 2, "2024-01-01T00:00:00.000Z"))
            .unwrap();
        store
            .store_error("a", "p", &make_error("stale", 2, "2024-01-01T00:00:00.000Z"))
            .unwrap();
        store
            .transaction(|tx| {
                tx.execute(
                    "UPDATE process_errors SET created_at = '2000-01-01T00:00:00.000Z'
                     WHERE message = 'stale'",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.cleanup_old_errors(7).unwrap(), 1);
        let errors = store.get_errors("a").unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "fresh");
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = store();
        let result: StorageResult<()> = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO process_errors
                    (instance_id, process_id, error_hash, timestamp, level, message, raw_output)
                 VALUES ('a', 'p', 'h', 't', 1, 'm', 'r')",
                [],
            )?;
            Err(crate::error::StorageError::Internal("abort".into()))
        });

        assert!(result.is_err());
        assert!(store.get_errors("a").unwrap().is_empty());
    }
}
