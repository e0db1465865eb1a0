//! Connection handling for the `SQLite` index.
//!
//! One [`Connection`] sits behind a [`Mutex`]. WAL mode and a busy timeout
//! keep readers from other processes from failing while a sync writes.

use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Busy timeout applied to every connection, in milliseconds.
pub const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Acquires the connection lock, recovering from poison.
///
/// A panic inside a critical section leaves `SQLite` itself consistent
/// (the open transaction is rolled back when it is dropped), so the inner
/// connection is reused and the event is logged.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("promptvault_sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Applies the pragmas every index connection runs with.
///
/// - `journal_mode = WAL` for concurrent readers
/// - `synchronous = NORMAL`
/// - `busy_timeout` of [`BUSY_TIMEOUT_MS`]
///
/// Failures are ignored: in-memory databases reject WAL and still work.
pub fn configure_connection(conn: &Connection) {
    // journal_mode returns a row, so it cannot go through execute_batch.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS);
}

/// Records a counter and a latency histogram for one index operation.
pub fn record_operation_metrics(operation: &'static str, start: Instant, status: &'static str) {
    metrics::counter!(
        "promptvault_index_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "promptvault_index_operation_duration_ms",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
