// ABOUTME: Process log types: incoming log lines, persisted sequenced rows, cursors, and read results.
// ABOUTME: The sequence number, not the timestamp, is the only ordering key for reads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Which output stream a log line was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream name that is neither `stdout` nor `stderr`.
#[derive(Debug, Error)]
#[error("unknown log stream: {0}")]
pub struct ParseStreamError(pub String);

impl FromStr for LogStream {
    type Err = ParseStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogStream::Stdout),
            "stderr" => Ok(LogStream::Stderr),
            other => Err(ParseStreamError(other.to_string())),
        }
    }
}

/// A log line emitted by a supervised process, before it is sequenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessLog {
    pub instance_id: String,
    pub process_id: String,
    pub level: String,
    pub message: String,
    pub stream: LogStream,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl ProcessLog {
    /// Create a log with no source or metadata.
    pub fn new(
        instance_id: impl Into<String>,
        process_id: impl Into<String>,
        level: impl Into<String>,
        message: impl Into<String>,
        stream: LogStream,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            process_id: process_id.into(),
            level: level.into(),
            message: message.into(),
            stream,
            source: None,
            metadata: None,
        }
    }
}

/// A stored log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRow {
    pub id: i64,
    pub instance_id: String,
    pub process_id: String,
    pub level: String,
    pub message: String,
    /// Server-assigned write time. Informational only.
    pub timestamp: String,
    pub stream: LogStream,
    pub source: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub sequence: i64,
    pub created_at: String,
}

/// Bookmark for incremental consumption of one instance's logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCursor {
    pub instance_id: String,
    /// Highest sequence handed out by the read that produced this cursor.
    pub last_sequence: i64,
    pub last_retrieved: String,
}

impl LogCursor {
    /// A cursor positioned before the first log of an instance.
    pub fn start(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            last_sequence: 0,
            last_retrieved: String::new(),
        }
    }
}

/// Parameters for the most-recent-first paged read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub instance_id: String,
    #[serde(default = "LogFilter::default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl LogFilter {
    pub const DEFAULT_LIMIT: i64 = 100;

    fn default_limit() -> i64 {
        Self::DEFAULT_LIMIT
    }

    /// First page of an instance's logs with the default page size.
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// One page of logs plus the bookkeeping needed to fetch the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRetrievalResponse {
    pub logs: Vec<LogRow>,
    pub cursor: LogCursor,
    pub total_count: i64,
    pub has_more: bool,
}

/// Log count for one `(level, stream)` combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatsBucket {
    pub level: String,
    pub stream: LogStream,
    pub count: i64,
}

/// Per-bucket log counts for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatsSummary {
    pub total_logs: i64,
    pub buckets: Vec<LogStatsBucket>,
    pub oldest_log: Option<String>,
    pub newest_log: Option<String>,
}
