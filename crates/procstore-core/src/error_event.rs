// ABOUTME: Error event types: the transient report, the persisted deduplicated row, and the summary.
// ABOUTME: A row stands for every occurrence of one fingerprint within one instance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An error reported by a supervised process, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleError {
    pub instance_id: String,
    pub process_id: String,
    pub message: String,
    /// Ordinal severity; part of the fingerprint.
    pub level: i32,
    /// ISO-8601 time of this occurrence, as reported by the producer.
    pub timestamp: String,
    pub raw_output: String,
}

/// A deduplicated error as returned by reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRow {
    pub id: i64,
    pub instance_id: String,
    pub process_id: String,
    pub error_hash: String,
    /// Time of the most recent occurrence.
    pub timestamp: String,
    pub level: i32,
    pub message: String,
    /// Raw output of the most recent occurrence.
    pub raw_output: String,
    pub occurrence_count: i64,
    /// First-seen time.
    pub created_at: String,
}

/// Aggregate counts over the deduplicated errors of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub total_errors: i64,
    pub unique_errors: i64,
    pub repeated_errors: i64,
    pub errors_by_level: BTreeMap<i32, i64>,
    pub latest_error: Option<String>,
    pub oldest_error: Option<String>,
}

impl ErrorSummary {
    /// Build a summary from rows ordered most recently active first, as
    /// produced by the error store's read path. An empty slice yields the
    /// all-zero summary.
    pub fn from_rows(rows: &[ErrorRow]) -> Self {
        let mut summary = Self::default();
        for row in rows {
            summary.total_errors += row.occurrence_count;
            *summary.errors_by_level.entry(row.level).or_insert(0) += row.occurrence_count;
        }
        summary.unique_errors = rows.len() as i64;
        summary.repeated_errors = summary.total_errors - summary.unique_errors;
        summary.latest_error = rows.first().map(|r| r.timestamp.clone());
        summary.oldest_error = rows.last().map(|r| r.timestamp.clone());
        summary
    }
}
