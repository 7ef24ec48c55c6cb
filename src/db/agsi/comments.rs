use duckdb::Connection;
use jiff::civil::Date;
use log::info;
use serde::Serialize;

use crate::{
    commentary::Commentator,
    db::agsi::gas_storage_archive::{DailyRecord, GasStorageArchive},
    error::GasStorageError,
    utils::{
        calendar::{days_before, same_day_last_year},
        format::round2,
    },
};

pub const DEFAULT_BACKFILL_LIMIT: u32 = 60;

/// The numbers a comment is written from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommentInputs {
    pub percent: f64,
    pub delta: Option<f64>,
    /// Change vs. 7 calendar days earlier, 0.0 when that day is missing
    pub trend7: f64,
    /// Change vs. the same day last year
    pub yoy_gap: Option<f64>,
}

impl CommentInputs {
    pub fn resolve(
        archive: &GasStorageArchive,
        conn: &Connection,
        record: &DailyRecord,
    ) -> Result<CommentInputs, duckdb::Error> {
        let diff_with = |date: Option<Date>| -> Result<Option<f64>, duckdb::Error> {
            Ok(match date {
                Some(d) => archive
                    .percent_on(conn, d)?
                    .map(|p| round2(record.percent - p)),
                None => None,
            })
        };
        Ok(CommentInputs {
            percent: record.percent,
            delta: record.delta,
            trend7: diff_with(days_before(record.date, 7))?.unwrap_or(0.0),
            yoy_gap: diff_with(same_day_last_year(record.date))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    pub date: Date,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yoy_gap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend7: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillReport {
    pub updated: usize,
}

/// Generate and store a comment for one record.
pub fn write_comment(
    archive: &GasStorageArchive,
    conn: &Connection,
    commentator: &Commentator,
    record: &DailyRecord,
) -> Result<(String, CommentInputs), GasStorageError> {
    let inputs = CommentInputs::resolve(archive, conn, record)?;
    let comment = commentator.generate(
        inputs.percent,
        inputs.delta,
        Some(inputs.trend7),
        inputs.yoy_gap,
    );
    archive.set_comment(conn, record.date, &comment)?;
    Ok((comment, inputs))
}

/// Comment the latest record.  An existing comment is kept unless `force`.
pub fn refresh_latest(
    archive: &GasStorageArchive,
    commentator: &Commentator,
    force: bool,
) -> Result<RefreshReport, GasStorageError> {
    let conn = archive.connection()?;
    let record = archive
        .get_latest(&conn)?
        .ok_or_else(|| GasStorageError::NotFound("No rows".to_string()))?;
    if record.has_comment() && !force {
        info!("Comment for {} already present, skipping", record.date);
        return Ok(RefreshReport {
            date: record.date,
            skipped: true,
            percent: None,
            delta: None,
            yoy_gap: None,
            trend7: None,
        });
    }
    let (_, inputs) = write_comment(archive, &conn, commentator, &record)?;
    info!("Refreshed comment for {}", record.date);
    Ok(RefreshReport {
        date: record.date,
        skipped: false,
        percent: Some(inputs.percent),
        delta: inputs.delta,
        yoy_gap: inputs.yoy_gap,
        trend7: Some(inputs.trend7),
    })
}

/// Comment the last `limit` records that have none, or all of them if
/// `force`.
pub fn backfill_comments(
    archive: &GasStorageArchive,
    commentator: &Commentator,
    limit: u32,
    force: bool,
) -> Result<BackfillReport, GasStorageError> {
    let conn = archive.connection()?;
    let mut updated = 0;
    for record in archive.get_last_n(&conn, limit)? {
        if force || !record.has_comment() {
            write_comment(archive, &conn, commentator, &record)?;
            updated += 1;
        }
    }
    info!("Backfilled {} comments", updated);
    Ok(BackfillReport { updated })
}
