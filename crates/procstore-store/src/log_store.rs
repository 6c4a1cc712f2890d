// ABOUTME: Append-only log store that stamps every row with a global, strictly increasing sequence.
// ABOUTME: Serves most-recent-first pages, ascending reads after a cursor, and per-bucket stats.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Duration, Utc};
use procstore_core::{
    ClearedCount, LogCursor, LogFilter, LogRetrievalResponse, LogRow, LogStatsBucket,
    LogStatsSummary, LogStream, ProcessLog, format_timestamp, now_timestamp,
};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, TransactionBehavior, params};
use serde_json::{Map, Value};

use crate::connection::{SharedConnection, lock};
use crate::error::StorageResult;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS process_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        instance_id TEXT NOT NULL,
        process_id TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        stream TEXT NOT NULL,
        source TEXT,
        metadata TEXT,
        sequence INTEGER NOT NULL UNIQUE,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE INDEX IF NOT EXISTS idx_process_logs_instance ON process_logs(instance_id);
    CREATE INDEX IF NOT EXISTS idx_process_logs_sequence ON process_logs(sequence);
    CREATE INDEX IF NOT EXISTS idx_process_logs_timestamp ON process_logs(timestamp DESC);
    CREATE INDEX IF NOT EXISTS idx_process_logs_level ON process_logs(level);
    CREATE INDEX IF NOT EXISTS idx_process_logs_instance_sequence
        ON process_logs(instance_id, sequence);
";

const LOG_COLUMNS: &str = "id, instance_id, process_id, level, message, timestamp, stream, \
                           source, metadata, sequence, created_at";

/// Log table access bound to one connection.
///
/// The next sequence number lives in memory, seeded from the table at
/// construction. Sequences are only unique while this is the sole writer to
/// the store file.
pub struct LogStorage {
    conn: SharedConnection,
    next_sequence: AtomicI64,
}

impl LogStorage {
    /// Bind to a connection, creating the log table and indexes if needed and
    /// seeding the sequence counter from the highest stored sequence.
    pub fn new(conn: SharedConnection) -> StorageResult<Self> {
        let next = {
            let guard = lock(&conn);
            guard.execute_batch(SCHEMA)?;
            guard.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM process_logs",
                [],
                |row| row.get::<_, i64>(0),
            )?
        };
        tracing::debug!("log store ready, next sequence {}", next);

        Ok(Self {
            conn,
            next_sequence: AtomicI64::new(next),
        })
    }

    /// Highest sequence assigned so far, or 0 when no log was ever stored.
    pub fn last_sequence(&self) -> i64 {
        self.next_sequence.load(Ordering::SeqCst) - 1
    }

    pub(crate) fn next_sequence(&self) -> i64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    /// Move the counter forward after a transaction that inserted logs on
    /// this store's connection committed. Never moves it back.
    pub(crate) fn advance_to(&self, next: i64) {
        self.next_sequence.fetch_max(next, Ordering::SeqCst);
    }

    /// Store a batch of logs atomically, returning their sequences in input order.
    ///
    /// Any failure rolls back the whole batch and leaves the counter where it
    /// was, so a retried batch receives the same numbers.
    pub fn store_logs(&self, logs: &[ProcessLog]) -> StorageResult<Vec<i64>> {
        if logs.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = lock(&self.conn);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let first = self.next_sequence.load(Ordering::SeqCst);
        let sequences = insert_batch(&tx, first, logs)?;
        tx.commit()?;
        self.next_sequence
            .store(first + logs.len() as i64, Ordering::SeqCst);
        tracing::debug!(
            "stored {} logs, sequences {}..={}",
            logs.len(),
            first,
            first + logs.len() as i64 - 1
        );
        Ok(sequences)
    }

    /// A page of an instance's logs, newest sequence first.
    pub fn get_logs(&self, filter: &LogFilter) -> StorageResult<LogRetrievalResponse> {
        let conn = lock(&self.conn);

        let total_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM process_logs WHERE instance_id = ?1",
            params![filter.instance_id],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {LOG_COLUMNS} FROM process_logs
             WHERE instance_id = ?1
             ORDER BY sequence DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![filter.instance_id, filter.limit, filter.offset],
            log_from_row,
        )?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }

        let has_more = filter.offset + (logs.len() as i64) < total_count;
        let last_sequence = logs.iter().map(|l| l.sequence).max().unwrap_or(0);

        Ok(LogRetrievalResponse {
            cursor: LogCursor {
                instance_id: filter.instance_id.clone(),
                last_sequence,
                last_retrieved: now_timestamp(),
            },
            logs,
            total_count,
            has_more,
        })
    }

    /// Up to `limit` logs of the cursor's instance with a sequence above the
    /// cursor's, in ascending order. The returned cursor points past them.
    pub fn get_logs_since(
        &self,
        cursor: &LogCursor,
        limit: i64,
    ) -> StorageResult<LogRetrievalResponse> {
        let conn = lock(&self.conn);

        let total_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM process_logs WHERE instance_id = ?1 AND sequence > ?2",
            params![cursor.instance_id, cursor.last_sequence],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {LOG_COLUMNS} FROM process_logs
             WHERE instance_id = ?1 AND sequence > ?2
             ORDER BY sequence ASC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![cursor.instance_id, cursor.last_sequence, limit],
            log_from_row,
        )?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }

        let has_more = (logs.len() as i64) < total_count;
        let last_sequence = logs.last().map_or(cursor.last_sequence, |l| l.sequence);

        Ok(LogRetrievalResponse {
            cursor: LogCursor {
                instance_id: cursor.instance_id.clone(),
                last_sequence,
                last_retrieved: now_timestamp(),
            },
            logs,
            total_count,
            has_more,
        })
    }

    /// Log counts per `(level, stream)` plus the overall time span.
    pub fn get_log_stats(&self, instance_id: &str) -> StorageResult<LogStatsSummary> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare_cached(
            "SELECT level, stream, COUNT(*), MIN(timestamp), MAX(timestamp)
             FROM process_logs
             WHERE instance_id = ?1
             GROUP BY level, stream
             ORDER BY level, stream",
        )?;
        let rows = stmt.query_map(params![instance_id], |row| {
            let stream: String = row.get(1)?;
            Ok((
                LogStatsBucket {
                    level: row.get(0)?,
                    stream: parse_stream(1, stream)?,
                    count: row.get(2)?,
                },
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut summary = LogStatsSummary::default();
        for row in rows {
            let (bucket, oldest, newest) = row?;
            summary.total_logs += bucket.count;
            summary.buckets.push(bucket);
            if summary.oldest_log.as_ref().is_none_or(|o| oldest < *o) {
                summary.oldest_log = Some(oldest);
            }
            if summary.newest_log.as_ref().is_none_or(|n| newest > *n) {
                summary.newest_log = Some(newest);
            }
        }
        Ok(summary)
    }

    /// Delete every log of an instance.
    pub fn clear_logs(&self, instance_id: &str) -> StorageResult<ClearedCount> {
        delete_instance(&lock(&self.conn), instance_id)
    }

    /// Delete logs written more than `retention_hours` hours ago.
    pub fn cleanup_old_logs(&self, retention_hours: u32) -> StorageResult<usize> {
        let cutoff = Utc::now() - Duration::hours(i64::from(retention_hours));
        let removed = lock(&self.conn).execute(
            "DELETE FROM process_logs WHERE timestamp < ?1",
            params![format_timestamp(cutoff)],
        )?;
        tracing::info!(
            "removed {} log rows older than {} hours",
            removed,
            retention_hours
        );
        Ok(removed)
    }
}

/// Insert `logs` with sequences starting at `first`. The caller owns the
/// surrounding transaction and the counter.
pub(crate) fn insert_batch(
    conn: &Connection,
    first: i64,
    logs: &[ProcessLog],
) -> StorageResult<Vec<i64>> {
    let now = now_timestamp();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO process_logs
            (instance_id, process_id, level, message, timestamp, stream, source,
             metadata, sequence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;

    let mut sequences = Vec::with_capacity(logs.len());
    for (offset, log) in logs.iter().enumerate() {
        let sequence = first + offset as i64;
        let metadata = log.metadata.as_ref().map(serde_json::to_string).transpose()?;
        stmt.execute(params![
            log.instance_id,
            log.process_id,
            log.level,
            log.message,
            now,
            log.stream.as_str(),
            log.source,
            metadata,
            sequence,
            now,
        ])?;
        sequences.push(sequence);
    }
    Ok(sequences)
}

pub(crate) fn delete_instance(conn: &Connection, instance_id: &str) -> StorageResult<ClearedCount> {
    let cleared_count = conn.execute(
        "DELETE FROM process_logs WHERE instance_id = ?1",
        params![instance_id],
    )?;
    tracing::info!("cleared {} log rows for {}", cleared_count, instance_id);
    Ok(ClearedCount { cleared_count })
}

fn parse_stream(column: usize, value: String) -> rusqlite::Result<LogStream> {
    value
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogRow> {
    let stream: String = row.get(6)?;
    let metadata: Option<String> = row.get(8)?;
    let metadata = metadata
        .map(|text| serde_json::from_str::<Map<String, Value>>(&text))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(LogRow {
        id: row.get(0)?,
        instance_id: row.get(1)?,
        process_id: row.get(2)?,
        level: row.get(3)?,
        message: row.get(4)?,
        timestamp: row.get(5)?,
        stream: parse_stream(6, stream)?,
        source: row.get(7)?,
        metadata,
        sequence: row.get(9)?,
        created_at: row.get(10)?,
    })
}
