use std::time::Duration;

use duckdb::DuckdbConnectionManager;
use log::warn;

pub trait WithRetry {
    /// Use this function for DDL that may race with another process holding
    /// the database file (the cron job and the server share one file).
    /// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
    fn execute_batch_with_retry(
        &self,
        sql: &str,
        max_attempts: u32,
        initial_wait: Duration,
    ) -> Result<(), duckdb::Error>;
}

impl WithRetry for duckdb::Connection {
    fn execute_batch_with_retry(
        &self,
        sql: &str,
        max_attempts: u32,
        initial_wait: Duration,
    ) -> Result<(), duckdb::Error> {
        retry(max_attempts, initial_wait, || self.execute_batch(sql))
    }
}

/// Open a pooled connection manager on a DuckDB file.  DuckDB allows a single
/// writing process per file, so a short exponential backoff covers the case
/// where another job is just finishing.
/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
pub fn manager_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
) -> Result<DuckdbConnectionManager, duckdb::Error> {
    retry(max_attempts, initial_wait, || {
        DuckdbConnectionManager::file(duckdb_path)
    })
}

fn retry<T>(
    max_attempts: u32,
    initial_wait: Duration,
    mut f: impl FnMut() -> Result<T, duckdb::Error>,
) -> Result<T, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!(
                    "Retrying DuckDB call after error: {} (attempt {}/{})",
                    e, attempts, max_attempts
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}
