use duckdb::{params, Connection, DuckdbConnectionManager, Row};
use jiff::civil::Date;
use r2d2::PooledConnection;
use serde::Serialize;

use crate::{db::agsi::schema, error::GasStorageError};

pub type DbPool = r2d2::Pool<DuckdbConnectionManager>;

/// One day of EU storage data, as stored in the `gas_storage_daily` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRecord {
    pub date: Date,
    /// Fill level, 0-100
    pub percent: f64,
    /// Percentage points vs. the previous calendar day, if that day is stored
    pub delta: Option<f64>,
    pub comment: Option<String>,
}

impl DailyRecord {
    pub fn has_comment(&self) -> bool {
        self.comment
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbStats {
    pub rows: i64,
    pub last_date: Option<Date>,
    pub last_percent: Option<f64>,
}

const RECORD_COLUMNS: &str = "CAST(date AS VARCHAR), percent, delta, comment";

/// The daily storage table.  Callers check a connection out of the pool for
/// the duration of one operation and pass it (or a transaction) to the
/// methods below, so several of them can share one transaction.
#[derive(Clone)]
pub struct GasStorageArchive {
    pub pool: DbPool,
}

impl GasStorageArchive {
    /// Wrap a pool and make sure the schema is current.
    pub fn new(pool: DbPool) -> Result<GasStorageArchive, GasStorageError> {
        let mut conn = pool.get()?;
        schema::migrate(&mut conn)?;
        Ok(GasStorageArchive { pool })
    }

    /// A private in-memory database, shared by all the pooled connections.
    pub fn in_memory() -> Result<GasStorageArchive, GasStorageError> {
        let manager = DuckdbConnectionManager::memory()?;
        let pool = r2d2::Pool::builder().max_size(4).build(manager)?;
        GasStorageArchive::new(pool)
    }

    pub fn connection(
        &self,
    ) -> Result<PooledConnection<DuckdbConnectionManager>, GasStorageError> {
        Ok(self.pool.get()?)
    }

    pub fn get_record(&self, conn: &Connection, date: Date) -> Result<Option<DailyRecord>, duckdb::Error> {
        let query = format!(
            "SELECT {} FROM gas_storage_daily WHERE date = CAST(? AS DATE);",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&query)?;
        let res: Vec<DailyRecord> = stmt
            .query_map(params![date.to_string()], to_record)?
            .collect::<Result<_, _>>()?;
        Ok(res.into_iter().next())
    }

    pub fn get_latest(&self, conn: &Connection) -> Result<Option<DailyRecord>, duckdb::Error> {
        Ok(self.get_last_n(conn, 1)?.pop())
    }

    /// The `n` most recent records, in ascending date order.
    pub fn get_last_n(&self, conn: &Connection, n: u32) -> Result<Vec<DailyRecord>, duckdb::Error> {
        let query = format!(
            r#"
SELECT * FROM (
    SELECT {}, date AS d
    FROM gas_storage_daily
    ORDER BY date DESC
    LIMIT {}
)
ORDER BY d;
    "#,
            RECORD_COLUMNS, n
        );
        let mut stmt = conn.prepare(&query)?;
        let res = stmt.query_map([], to_record)?.collect::<Result<_, _>>()?;
        Ok(res)
    }

    /// Records with `start <= date <= end`, ascending.
    pub fn get_range(
        &self,
        conn: &Connection,
        start: Date,
        end: Date,
    ) -> Result<Vec<DailyRecord>, duckdb::Error> {
        let query = format!(
            r#"
SELECT {}
FROM gas_storage_daily
WHERE date >= CAST(? AS DATE)
AND date <= CAST(? AS DATE)
ORDER BY date;
    "#,
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&query)?;
        let res = stmt
            .query_map(params![start.to_string(), end.to_string()], to_record)?
            .collect::<Result<_, _>>()?;
        Ok(res)
    }

    /// Every record from `start` on (or all of them), ascending.
    pub fn get_since(
        &self,
        conn: &Connection,
        start: Option<Date>,
    ) -> Result<Vec<DailyRecord>, duckdb::Error> {
        let res: Vec<DailyRecord> = match start {
            Some(d) => {
                let query = format!(
                    "SELECT {} FROM gas_storage_daily WHERE date >= CAST(? AS DATE) ORDER BY date;",
                    RECORD_COLUMNS
                );
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt.query_map(params![d.to_string()], to_record)?;
                rows.collect::<Result<_, _>>()?
            }
            None => {
                let query = format!("SELECT {} FROM gas_storage_daily ORDER BY date;", RECORD_COLUMNS);
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt.query_map([], to_record)?;
                rows.collect::<Result<_, _>>()?
            }
        };
        Ok(res)
    }

    pub fn last_date(&self, conn: &Connection) -> Result<Option<Date>, duckdb::Error> {
        Ok(self.get_latest(conn)?.map(|r| r.date))
    }

    pub fn percent_on(&self, conn: &Connection, date: Date) -> Result<Option<f64>, duckdb::Error> {
        Ok(self.get_record(conn, date)?.map(|r| r.percent))
    }

    pub fn stats(&self, conn: &Connection) -> Result<DbStats, duckdb::Error> {
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM gas_storage_daily;", [], |row| {
            row.get(0)
        })?;
        let latest = self.get_latest(conn)?;
        Ok(DbStats {
            rows,
            last_date: latest.as_ref().map(|r| r.date),
            last_percent: latest.map(|r| r.percent),
        })
    }

    /// Insert a new day, or overwrite the percent of an existing one.  Delta
    /// and comment are left alone.  The second element tells the caller the
    /// existing record has no comment yet.
    pub fn upsert_percent(
        &self,
        conn: &Connection,
        date: Date,
        percent: f64,
    ) -> Result<(UpsertOutcome, bool), duckdb::Error> {
        match self.get_record(conn, date)? {
            None => {
                conn.execute(
                    r#"
INSERT INTO gas_storage_daily (date, percent, delta, comment)
VALUES (CAST(? AS DATE), ?, NULL, NULL);"#,
                    params![date.to_string(), percent],
                )?;
                Ok((UpsertOutcome::Inserted, false))
            }
            Some(existing) => {
                let needs_comment = !existing.has_comment();
                if existing.percent == percent {
                    return Ok((UpsertOutcome::Unchanged, needs_comment));
                }
                conn.execute(
                    "UPDATE gas_storage_daily SET percent = ? WHERE date = CAST(? AS DATE);",
                    params![percent, date.to_string()],
                )?;
                Ok((UpsertOutcome::Updated, needs_comment))
            }
        }
    }

    pub fn set_delta(
        &self,
        conn: &Connection,
        date: Date,
        delta: Option<f64>,
    ) -> Result<usize, duckdb::Error> {
        conn.execute(
            "UPDATE gas_storage_daily SET delta = ? WHERE date = CAST(? AS DATE);",
            params![delta, date.to_string()],
        )
    }

    pub fn set_comment(
        &self,
        conn: &Connection,
        date: Date,
        comment: &str,
    ) -> Result<usize, duckdb::Error> {
        conn.execute(
            "UPDATE gas_storage_daily SET comment = ? WHERE date = CAST(? AS DATE);",
            params![comment, date.to_string()],
        )
    }
}

#[cfg(test)]
impl GasStorageArchive {
    /// Insert `(date, percent)` pairs, test setup only.
    pub(crate) fn seed(&self, data: &[(Date, f64)]) -> Result<(), GasStorageError> {
        let conn = self.connection()?;
        for (d, p) in data {
            self.upsert_percent(&conn, *d, *p)?;
        }
        Ok(())
    }
}

fn to_record(row: &Row) -> Result<DailyRecord, duckdb::Error> {
    let date_str: String = row.get(0)?;
    let date = date_str.parse::<Date>().map_err(|e| {
        duckdb::Error::FromSqlConversionFailure(0, duckdb::types::Type::Text, Box::new(e))
    })?;
    Ok(DailyRecord {
        date,
        percent: row.get(1)?,
        delta: row.get(2)?,
        comment: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::civil::date;

    use super::*;

    #[test]
    fn upsert_is_idempotent() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        let conn = archive.connection()?;
        let d = date(2025, 1, 10);
        assert_eq!(archive.upsert_percent(&conn, d, 81.0)?.0, UpsertOutcome::Inserted);
        assert_eq!(archive.upsert_percent(&conn, d, 81.0)?.0, UpsertOutcome::Unchanged);
        assert_eq!(archive.upsert_percent(&conn, d, 81.23)?.0, UpsertOutcome::Updated);
        assert_eq!(archive.stats(&conn)?.rows, 1);
        let rec = archive.get_record(&conn, d)?.unwrap();
        assert_eq!(rec.percent, 81.23);
        assert_eq!(rec.delta, None);
        assert_eq!(rec.comment, None);
        Ok(())
    }

    #[test]
    fn upsert_keeps_comment_and_delta() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        let conn = archive.connection()?;
        let d = date(2025, 1, 10);
        archive.upsert_percent(&conn, d, 81.0)?;
        archive.set_delta(&conn, d, Some(0.5))?;
        archive.set_comment(&conn, d, "Stabilné.")?;
        let (outcome, needs_comment) = archive.upsert_percent(&conn, d, 82.0)?;
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert!(!needs_comment);
        let rec = archive.get_record(&conn, d)?.unwrap();
        assert_eq!(rec.delta, Some(0.5));
        assert_eq!(rec.comment.as_deref(), Some("Stabilné."));
        Ok(())
    }

    #[test]
    fn last_n_is_ascending() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        archive.seed(&[
                (date(2025, 1, 3), 3.0),
                (date(2025, 1, 1), 1.0),
                (date(2025, 1, 2), 2.0),
                (date(2025, 1, 5), 5.0),
        ])?;
        let conn = archive.connection()?;
        let xs = archive.get_last_n(&conn, 3)?;
        let dates: Vec<Date> = xs.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![date(2025, 1, 2), date(2025, 1, 3), date(2025, 1, 5)]);
        assert_eq!(archive.last_date(&conn)?, Some(date(2025, 1, 5)));
        assert_eq!(
            archive.get_range(&conn, date(2025, 1, 2), date(2025, 1, 3))?.len(),
            2
        );
        assert_eq!(archive.get_since(&conn, Some(date(2025, 1, 3)))?.len(), 2);
        assert_eq!(archive.get_since(&conn, Some(date(2025, 1, 6)))?.len(), 0);
        assert_eq!(archive.get_since(&conn, Some(date(2024, 12, 31)))?.len(), 4);
        assert_eq!(archive.get_since(&conn, None)?.len(), 4);
        Ok(())
    }

    #[test]
    fn empty_store() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        let conn = archive.connection()?;
        assert_eq!(archive.get_latest(&conn)?, None);
        let stats = archive.stats(&conn)?;
        assert_eq!(stats.rows, 0);
        assert_eq!(stats.last_date, None);
        Ok(())
    }
}
