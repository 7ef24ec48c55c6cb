use std::collections::BTreeMap;

use jiff::civil::Date;
use log::info;
use serde::Serialize;

use crate::{
    db::agsi::gas_storage_archive::GasStorageArchive,
    error::GasStorageError,
    utils::{calendar::days_before, format::round2},
};

/// Incremental recomputes are capped at five years.
pub const MAX_RECOMPUTE_DAYS: i64 = 5 * 365;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecomputeReport {
    pub mode: String,
    pub changed: usize,
}

/// Day-over-day change for every `(date, percent)` pair, ascending by date.
/// The baseline is always the previous *calendar* day: a day whose
/// predecessor is missing gets `None`, never the change vs. an older row.
pub fn compute_deltas(records: &[(Date, f64)]) -> Vec<(Date, Option<f64>)> {
    let by_date: BTreeMap<Date, f64> = records.iter().copied().collect();
    by_date
        .iter()
        .map(|(date, percent)| {
            let delta = date
                .yesterday()
                .ok()
                .and_then(|d| by_date.get(&d))
                .map(|prev| round2(percent - prev));
            (*date, delta)
        })
        .collect()
}

/// Recompute the delta of every stored day.
pub fn recompute_all(archive: &GasStorageArchive) -> Result<RecomputeReport, GasStorageError> {
    let changed = recompute_from(archive, None)?;
    info!("Recomputed deltas for all {} rows", changed);
    Ok(RecomputeReport {
        mode: "full".to_string(),
        changed,
    })
}

/// Recompute the deltas of the days on or after `max(date) - days`.  The day
/// before that window is read too, so the first day in the window gets its
/// proper baseline.
pub fn recompute_last(
    archive: &GasStorageArchive,
    days: i64,
) -> Result<RecomputeReport, GasStorageError> {
    if days <= 0 {
        return Err(GasStorageError::InvalidInput("days must be > 0".to_string()));
    }
    let days = days.min(MAX_RECOMPUTE_DAYS);
    let last = {
        let conn = archive.connection()?;
        archive.last_date(&conn)?
    };
    let changed = match last {
        Some(last) => {
            let since = days_before(last, days).ok_or_else(|| {
                GasStorageError::InvalidInput(format!("days {} out of range", days))
            })?;
            recompute_from(archive, Some(since))?
        }
        None => 0,
    };
    info!("Recomputed deltas for {} rows (last {} days)", changed, days);
    Ok(RecomputeReport {
        mode: format!("last_{}_days", days),
        changed,
    })
}

/// Write deltas for all days `>= since` in one transaction.  Returns the
/// number of rows written.
fn recompute_from(
    archive: &GasStorageArchive,
    since: Option<Date>,
) -> Result<usize, GasStorageError> {
    let mut conn = archive.connection()?;
    let context_start = since.and_then(|d| d.yesterday().ok());
    let records: Vec<(Date, f64)> = archive
        .get_since(&conn, context_start.or(since))?
        .into_iter()
        .map(|r| (r.date, r.percent))
        .collect();

    let deltas = compute_deltas(&records);
    let tx = conn.transaction()?;
    let mut changed = 0;
    for (date, delta) in deltas {
        if since.map(|s| date < s).unwrap_or(false) {
            continue;
        }
        changed += archive.set_delta(&tx, date, delta)?;
    }
    tx.commit()?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::civil::date;

    use super::*;

    #[test]
    fn consecutive_days() {
        let xs = compute_deltas(&[(date(2025, 1, 10), 81.23), (date(2025, 1, 9), 80.00)]);
        assert_eq!(xs, vec![(date(2025, 1, 9), None), (date(2025, 1, 10), Some(1.23))]);
    }

    #[test]
    fn gap_gives_null_not_previous_row() {
        let xs = compute_deltas(&[(date(2025, 1, 8), 79.0), (date(2025, 1, 10), 81.0)]);
        assert_eq!(xs, vec![(date(2025, 1, 8), None), (date(2025, 1, 10), None)]);
    }

    #[test]
    fn recompute_scenario() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        archive.seed(&[(date(2025, 1, 9), 80.00), (date(2025, 1, 10), 81.23)])?;
        let report = recompute_all(&archive)?;
        assert_eq!(report.mode, "full");
        assert_eq!(report.changed, 2);
        let conn = archive.connection()?;
        assert_eq!(archive.get_record(&conn, date(2025, 1, 10))?.unwrap().delta, Some(1.23));
        assert_eq!(archive.get_record(&conn, date(2025, 1, 9))?.unwrap().delta, None);
        Ok(())
    }

    #[test]
    fn recompute_is_idempotent() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        archive.seed(&[
            (date(2025, 1, 7), 78.0),
            (date(2025, 1, 8), 79.5),
            (date(2025, 1, 10), 81.0),
        ])?;
        recompute_all(&archive)?;
        let conn = archive.connection()?;
        let first = archive.get_since(&conn, None)?;
        recompute_all(&archive)?;
        let second = archive.get_since(&conn, None)?;
        assert_eq!(first, second);
        assert_eq!(second[1].delta, Some(1.5));
        assert_eq!(second[2].delta, None);
        Ok(())
    }

    #[test]
    fn incremental_uses_context_day() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        archive.seed(&[
            (date(2025, 1, 1), 70.0),
            (date(2025, 1, 2), 71.0),
            (date(2025, 1, 3), 73.0),
            (date(2025, 1, 4), 76.0),
        ])?;
        // since = 2025-01-03, context day 2025-01-02
        let report = recompute_last(&archive, 1)?;
        assert_eq!(report.mode, "last_1_days");
        assert_eq!(report.changed, 2);
        let conn = archive.connection()?;
        let xs = archive.get_since(&conn, None)?;
        assert_eq!(xs[0].delta, None);
        assert_eq!(xs[1].delta, None); // outside the window, untouched
        assert_eq!(xs[2].delta, Some(2.0));
        assert_eq!(xs[3].delta, Some(3.0));
        Ok(())
    }

    #[test]
    fn incremental_rejects_non_positive_days() -> Result<(), Box<dyn Error>> {
        let archive = GasStorageArchive::in_memory()?;
        assert!(matches!(
            recompute_last(&archive, 0),
            Err(GasStorageError::InvalidInput(_))
        ));
        assert_eq!(recompute_last(&archive, 7)?.changed, 0);
        Ok(())
    }
}
