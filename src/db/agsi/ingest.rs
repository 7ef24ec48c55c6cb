use jiff::{civil::Date, ToSpan, Zoned};
use log::{error, info};
use serde::Serialize;

use crate::{
    commentary::Commentator,
    config::Settings,
    db::agsi::{
        agsi_client::{AgsiClient, StorageSource},
        comments::write_comment,
        gas_storage_archive::{GasStorageArchive, UpsertOutcome},
    },
    error::GasStorageError,
    utils::calendar::days_before,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestPolicy {
    pub publication_lag_days: i64,
    pub history_floor: Date,
}

impl IngestPolicy {
    pub fn from_settings(settings: &Settings) -> IngestPolicy {
        IngestPolicy {
            publication_lag_days: settings.publication_lag_days,
            history_floor: settings.history_floor,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub from_date: Option<Date>,
    pub max_available_date: Option<Date>,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub source_count: usize,
    pub pages: u32,
}

/// The last gas day the source has published.
pub fn max_available_date(today: Date, publication_lag_days: i64) -> Result<Date, GasStorageError> {
    days_before(today, publication_lag_days.max(0)).ok_or_else(|| {
        GasStorageError::InvalidInput(format!(
            "publication lag of {} days out of range",
            publication_lag_days
        ))
    })
}

/// Where an ingest run starts.
///
/// An explicit start after `max_available` is an error.  Otherwise the day
/// after the last stored one, clamped to `max_available`, or the history
/// floor for an empty store.
pub fn resolve_start(
    requested: Option<Date>,
    last_stored: Option<Date>,
    max_available: Date,
    history_floor: Date,
) -> Result<Date, GasStorageError> {
    match (requested, last_stored) {
        (Some(requested), _) if requested > max_available => {
            Err(GasStorageError::FutureDateRequested {
                requested,
                max_available,
            })
        }
        (Some(requested), _) => Ok(requested),
        (None, Some(last)) => {
            let next = last.checked_add(1.day())?;
            Ok(next.min(max_available))
        }
        (None, None) => Ok(history_floor.min(max_available)),
    }
}

/// Fetch every published day from the start date on and upsert it.
///
/// Pages are committed one by one, so a failure part way leaves the pages
/// before it in the store.  Existing days without a comment get one after
/// their page commits.  Deltas are not touched.
pub fn ingest(
    archive: &GasStorageArchive,
    source: &dyn StorageSource,
    commentator: &Commentator,
    requested: Option<Date>,
    today: Date,
    policy: IngestPolicy,
) -> Result<IngestReport, GasStorageError> {
    let max_available = max_available_date(today, policy.publication_lag_days)?;
    let mut conn = archive.connection()?;
    let last_stored = archive.last_date(&conn)?;
    let start = resolve_start(requested, last_stored, max_available, policy.history_floor)?;
    info!("Ingesting AGSI data from {} to {}", start, max_available);

    let mut report = IngestReport {
        from_date: Some(start),
        max_available_date: Some(max_available),
        ..Default::default()
    };
    let mut page = 1;
    loop {
        let data = source
            .fetch_page(start, max_available, page)
            .inspect_err(|e| error!("Page {} failed: {}", page, e))?;
        report.pages += 1;
        report.source_count += data.raw_count;
        report.skipped += data.skipped;

        let mut needs_comment: Vec<Date> = Vec::new();
        let tx = conn.transaction()?;
        for row in &data.rows {
            let (outcome, missing) = archive.upsert_percent(&tx, row.date, row.percent)?;
            match outcome {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::Unchanged => report.unchanged += 1,
            }
            if missing {
                needs_comment.push(row.date);
            }
        }
        tx.commit()?;

        for date in needs_comment {
            if let Some(record) = archive.get_record(&conn, date)? {
                write_comment(archive, &conn, commentator, &record)?;
            }
        }

        if page >= data.last_page {
            break;
        }
        page += 1;
    }
    info!(
        "Ingested {} rows in {} pages: {} inserted, {} updated, {} unchanged, {} skipped",
        report.source_count,
        report.pages,
        report.inserted,
        report.updated,
        report.unchanged,
        report.skipped
    );
    Ok(report)
}

/// Ingest from the AGSI+ API, with today's date in the local time zone.
pub fn ingest_from_agsi(
    archive: &GasStorageArchive,
    settings: &Settings,
    commentator: &Commentator,
    requested: Option<Date>,
) -> Result<IngestReport, GasStorageError> {
    let client = AgsiClient::new(settings)?;
    ingest(
        archive,
        &client,
        commentator,
        requested,
        Zoned::now().date(),
        IngestPolicy::from_settings(settings),
    )
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, error::Error};

    use jiff::civil::date;

    use super::*;
    use crate::db::agsi::agsi_client::{SourcePage, SourceRow};

    /// Serves `rows` in pages of `page_size`, optionally failing on one page.
    struct FakeSource {
        rows: Vec<SourceRow>,
        page_size: usize,
        fail_on: Option<u32>,
        calls: RefCell<Vec<(Date, Date, u32)>>,
    }

    impl FakeSource {
        fn new(rows: Vec<SourceRow>, page_size: usize) -> FakeSource {
            FakeSource {
                rows,
                page_size,
                fail_on: None,
                calls: RefCell::new(vec![]),
            }
        }
    }

    impl StorageSource for FakeSource {
        fn fetch_page(&self, from: Date, to: Date, page: u32) -> Result<SourcePage, GasStorageError> {
            self.calls.borrow_mut().push((from, to, page));
            if self.fail_on == Some(page) {
                return Err(GasStorageError::SourceFetchFailed("HTTP 503".to_string()));
            }
            let rows: Vec<SourceRow> = self
                .rows
                .iter()
                .filter(|r| r.date >= from && r.date <= to)
                .cloned()
                .collect();
            let last_page = rows.len().div_ceil(self.page_size).max(1) as u32;
            let chunk: Vec<SourceRow> = rows
                .chunks(self.page_size)
                .nth(page as usize - 1)
                .map(|c| c.to_vec())
                .unwrap_or_default();
            Ok(SourcePage {
                raw_count: chunk.len(),
                rows: chunk,
                skipped: 0,
                last_page,
            })
        }
    }

    fn days_from(start: Date, n: i64) -> Vec<SourceRow> {
        (0..n)
            .map(|i| SourceRow {
                date: start.checked_add(i.days()).unwrap(),
                percent: 50.0 + i as f64 / 10.0,
            })
            .collect()
    }

    fn policy() -> IngestPolicy {
        IngestPolicy {
            publication_lag_days: 1,
            history_floor: date(2024, 1, 1),
        }
    }

    #[test]
    fn start_date_rules() {
        let max = date(2025, 1, 9);
        let floor = date(2025, 1, 1);
        assert_eq!(resolve_start(None, None, max, floor).unwrap(), floor);
        assert_eq!(
            resolve_start(None, Some(date(2025, 1, 5)), max, floor).unwrap(),
            date(2025, 1, 6)
        );
        // already up to date, re-fetch the last published day
        assert_eq!(resolve_start(None, Some(max), max, floor).unwrap(), max);
        assert_eq!(
            resolve_start(Some(date(2024, 6, 1)), Some(max), max, floor).unwrap(),
            date(2024, 6, 1)
        );
        match resolve_start(Some(date(2025, 1, 10)), None, max, floor) {
            Err(GasStorageError::FutureDateRequested {
                requested,
                max_available,
            }) => {
                assert_eq!(requested, date(2025, 1, 10));
                assert_eq!(max_available, max);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn lag_excludes_today() {
        assert_eq!(max_available_date(date(2025, 1, 10), 1).unwrap(), date(2025, 1, 9));
        assert_eq!(max_available_date(date(2025, 1, 10), 0).unwrap(), date(2025, 1, 10));
    }

    #[test]
    fn three_pages() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        let source = FakeSource::new(days_from(date(2024, 1, 1), 300), 100);
        let today = date(2024, 12, 31);
        let report = ingest(&archive, &source, &Commentator::offline(), None, today, policy())?;
        assert_eq!(report.source_count, 300);
        assert_eq!(report.pages, 3);
        assert_eq!(report.inserted, 300);
        assert_eq!(report.from_date, Some(date(2024, 1, 1)));
        assert_eq!(report.max_available_date, Some(date(2024, 12, 30)));

        let calls = source.calls.borrow();
        assert_eq!(calls.iter().map(|c| c.2).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(calls.iter().all(|c| c.1 == date(2024, 12, 30)));

        let conn = archive.connection()?;
        assert_eq!(archive.stats(&conn)?.rows, 300);
        // new rows get neither delta nor comment
        let first = archive.get_record(&conn, date(2024, 1, 1))?.unwrap();
        assert_eq!(first.delta, None);
        assert_eq!(first.comment, None);
        Ok(())
    }

    #[test]
    fn reingest_is_idempotent() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        let source = FakeSource::new(days_from(date(2024, 1, 1), 10), 300);
        let c = Commentator::offline();
        let today = date(2024, 1, 20);
        ingest(&archive, &source, &c, None, today, policy())?;

        let again = ingest(&archive, &source, &c, Some(date(2024, 1, 1)), today, policy())?;
        assert_eq!(again.source_count, 10);
        assert_eq!(again.inserted, 0);
        assert_eq!(again.updated, 0);
        assert_eq!(again.unchanged, 10);

        let conn = archive.connection()?;
        assert_eq!(archive.stats(&conn)?.rows, 10);
        // the second pass found them without a comment
        assert!(archive.get_since(&conn, None)?.iter().all(|r| r.has_comment()));
        Ok(())
    }

    #[test]
    fn changed_percent_is_updated() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        archive.seed(&[(date(2024, 1, 1), 10.0)])?;
        let source = FakeSource::new(days_from(date(2024, 1, 1), 2), 300);
        let report = ingest(
            &archive,
            &source,
            &Commentator::offline(),
            Some(date(2024, 1, 1)),
            date(2024, 1, 10),
            policy(),
        )?;
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 1);
        let conn = archive.connection()?;
        assert_eq!(archive.percent_on(&conn, date(2024, 1, 1))?, Some(50.0));
        Ok(())
    }

    #[test]
    fn future_date_leaves_store_empty() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        let source = FakeSource::new(days_from(date(2025, 1, 1), 10), 300);
        let res = ingest(
            &archive,
            &source,
            &Commentator::offline(),
            Some(date(2025, 1, 10)),
            date(2025, 1, 10),
            policy(),
        );
        assert!(matches!(res, Err(GasStorageError::FutureDateRequested { .. })));
        assert!(source.calls.borrow().is_empty());
        let conn = archive.connection()?;
        assert_eq!(archive.stats(&conn)?.rows, 0);
        Ok(())
    }

    #[test]
    fn failed_page_keeps_earlier_pages() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        let mut source = FakeSource::new(days_from(date(2024, 1, 1), 250), 100);
        source.fail_on = Some(2);
        let res = ingest(
            &archive,
            &source,
            &Commentator::offline(),
            None,
            date(2024, 12, 31),
            policy(),
        );
        assert!(matches!(res, Err(GasStorageError::SourceFetchFailed(_))));
        let conn = archive.connection()?;
        assert_eq!(archive.stats(&conn)?.rows, 100);
        assert_eq!(archive.last_date(&conn)?, Some(date(2024, 4, 9)));
        Ok(())
    }
}
