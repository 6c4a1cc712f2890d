// ABOUTME: Core library for procstore, containing the record types shared by every layer.
// ABOUTME: Defines error events, process logs, fingerprinting, timestamps, and result envelopes.

pub mod error_event;
pub mod fingerprint;
pub mod log_entry;
pub mod outcome;
pub mod time;

pub use error_event::{ErrorRow, ErrorSummary, SimpleError};
pub use fingerprint::{MAX_NORMALIZED_LEN, error_hash, normalize_message};
pub use log_entry::{
    LogCursor, LogFilter, LogRetrievalResponse, LogRow, LogStatsBucket, LogStatsSummary,
    LogStream, ParseStreamError, ProcessLog,
};
pub use outcome::{ClearedCount, Fault, Outcome};
pub use time::{format_timestamp, now_timestamp};
