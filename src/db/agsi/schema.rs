use std::time::Duration;

use duckdb::{params, Connection};
use log::info;

use crate::utils::lib_duckdb::WithRetry;

/// One step of the schema history.  Steps are applied in order, each in its
/// own transaction, and `meta.schema_version` records the last one applied.
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

const CREATE_META_SQL: &str = r"
CREATE TABLE IF NOT EXISTS meta (
    key VARCHAR PRIMARY KEY,
    value VARCHAR NOT NULL
);";

const V1_BASE_SQL: &str = r"
CREATE SEQUENCE IF NOT EXISTS gas_storage_daily_id_seq START 1;
CREATE TABLE IF NOT EXISTS gas_storage_daily (
    id BIGINT PRIMARY KEY DEFAULT nextval('gas_storage_daily_id_seq'),
    date DATE NOT NULL UNIQUE,
    percent DOUBLE NOT NULL,
    delta DOUBLE,
    comment VARCHAR
);";

const V2_DATE_INDEX_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_gsd_date ON gas_storage_daily(date);";

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: V1_BASE_SQL,
    },
    Migration {
        version: 2,
        sql: V2_DATE_INDEX_SQL,
    },
];

pub fn schema_version(conn: &Connection) -> Result<u32, duckdb::Error> {
    let mut stmt = conn.prepare("SELECT value FROM meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query_map([], |row| row.get::<usize, String>(0))?;
    let first = rows.next();
    match first {
        Some(v) => Ok(v?.parse::<u32>().unwrap_or(0)),
        None => Ok(0),
    }
}

/// Bring the database up to the latest schema version.  Returns the version
/// the database is at afterwards.
pub fn migrate(conn: &mut Connection) -> Result<u32, duckdb::Error> {
    conn.execute_batch_with_retry(CREATE_META_SQL, 8, Duration::from_millis(25))?;
    let applied = schema_version(conn)?;
    let mut current = applied;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![migration.version.to_string()],
        )?;
        tx.commit()?;
        info!("Applied schema migration v{}", migration.version);
        current = migration.version;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() -> Result<(), duckdb::Error> {
        let mut conn = Connection::open_in_memory()?;
        assert_eq!(migrate(&mut conn)?, 2);
        assert_eq!(migrate(&mut conn)?, 2);
        assert_eq!(schema_version(&conn)?, 2);
        Ok(())
    }

    #[test]
    fn migrate_from_v1() -> Result<(), duckdb::Error> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_META_SQL)?;
        conn.execute_batch(V1_BASE_SQL)?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', '1')",
            [],
        )?;
        assert_eq!(migrate(&mut conn)?, 2);
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM duckdb_indexes() WHERE index_name = 'idx_gsd_date'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(n, 1);
        Ok(())
    }

    #[test]
    fn date_is_unique() -> Result<(), duckdb::Error> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        conn.execute(
            "INSERT INTO gas_storage_daily (date, percent) VALUES ('2025-01-10', 81.23)",
            [],
        )?;
        let dup = conn.execute(
            "INSERT INTO gas_storage_daily (date, percent) VALUES ('2025-01-10', 80.0)",
            [],
        );
        assert!(dup.is_err());
        Ok(())
    }
}
