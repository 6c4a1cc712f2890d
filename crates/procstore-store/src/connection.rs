// ABOUTME: Opening SQLite store files and sharing connections between the error and log stores.
// ABOUTME: Applies WAL and cache pragmas only when a store file is created for the first time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;

use crate::error::StorageResult;

/// A connection that may be held by both stores at once.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Whether the log store borrows the error store's connection or owns its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOwnership {
    Shared,
    Exclusive,
}

/// Open (or create) a store file, creating its parent directory if needed.
pub fn open_connection(path: &Path) -> StorageResult<SharedConnection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let fresh = !path.exists();
    let conn = Connection::open(path)?;
    if fresh {
        configure_pragmas(&conn)?;
        tracing::info!("created store at {}", path.display());
    } else {
        tracing::debug!("opened existing store at {}", path.display());
    }

    Ok(Arc::new(Mutex::new(conn)))
}

/// Absolute, symlink-free path of a store file that may not exist yet.
///
/// The parent directory is created and canonicalized, then the file name is
/// joined back on, so different spellings of one file resolve identically.
pub fn resolve_store_path(path: &Path) -> StorageResult<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("store path {} has no file name", path.display()),
        )
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    fs::create_dir_all(parent)?;
    Ok(fs::canonicalize(parent)?.join(file_name))
}

fn configure_pragmas(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

/// Lock a shared connection.
///
/// A panic while the lock was held leaves the mutex poisoned; any open
/// transaction was rolled back when it unwound, so the connection is still
/// usable and the poison is ignored.
pub(crate) fn lock(conn: &SharedConnection) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        tracing::warn!("recovering connection lock poisoned by an earlier panic");
        poisoned.into_inner()
    })
}

/// Release a connection, closing it if this was the last handle.
pub(crate) fn release(conn: SharedConnection) {
    match Arc::try_unwrap(conn) {
        Ok(mutex) => {
            let conn = mutex.into_inner().unwrap_or_else(PoisonError::into_inner);
            if let Err((_, e)) = conn.close() {
                tracing::warn!("failed to close store connection cleanly: {}", e);
            }
        }
        Err(_) => {
            tracing::debug!("connection still referenced elsewhere; dropping handle only");
        }
    }
}

#[cfg(test)]
pub(crate) fn open_in_memory() -> SharedConnection {
    Arc::new(Mutex::new(Connection::open_in_memory().unwrap()))
}
