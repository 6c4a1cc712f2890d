// ABOUTME: Fixed-attempt retry for store mutations and the panic boundary around every public call.
// ABOUTME: Retries are immediate with no backoff; a caught panic becomes an Internal error and is not retried.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{StorageError, StorageResult};

/// Bounded, delay-free retry policy for embedded-store contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// A policy making at most `max_retries` attempts. Zero is raised to one.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent. The last error is returned on exhaustion.
    pub fn run<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut() -> StorageResult<T>,
    ) -> StorageResult<T> {
        guard(operation, || {
            let mut tries = 0;
            loop {
                tries += 1;
                match attempt() {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_retryable() && tries < self.max_attempts => {
                        tracing::warn!(
                            "{} failed (attempt {}/{}), retrying: {}",
                            operation,
                            tries,
                            self.max_attempts,
                            e
                        );
                    }
                    Err(e) => {
                        if e.is_retryable() {
                            tracing::error!(
                                "{} failed after {} attempts: {}",
                                operation,
                                tries,
                                e
                            );
                        }
                        return Err(e);
                    }
                }
            }
        })
    }
}

/// Run `f`, converting a panic into [`StorageError::Internal`].
///
/// The error message is the panic payload when it is a string, otherwise a
/// default naming the operation.
pub fn guard<T>(operation: &str, f: impl FnOnce() -> StorageResult<T>) -> StorageResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref())
                .unwrap_or_else(|| format!("unknown error occurred during {operation}"));
            tracing::error!("{} panicked: {}", operation, message);
            Err(StorageError::Internal(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some((*s).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}
