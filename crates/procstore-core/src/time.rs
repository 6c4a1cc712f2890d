// ABOUTME: Timestamp formatting shared by the error and log stores.
// ABOUTME: Produces fixed-width UTC RFC 3339 strings so text comparison matches time order.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC instant as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Every stored server-side timestamp goes through this function. The fixed
/// width keeps lexicographic order identical to chronological order, which the
/// retention sweeps rely on when comparing against a cutoff.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The current wall-clock time, formatted with [`format_timestamp`].
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}
