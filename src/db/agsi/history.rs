use std::{collections::BTreeMap, time::SystemTime};

use jiff::civil::Date;
use serde::Serialize;

use crate::{
    db::agsi::gas_storage_archive::{DailyRecord, GasStorageArchive},
    error::GasStorageError,
    utils::{
        calendar::{days_before, shift_years},
        format::{format_date, format_delta, format_percent, round2, Locale},
        ttl_cache::TtlCache,
    },
};

pub const DEFAULT_HISTORY_DAYS: u32 = 30;
pub const MAX_HISTORY_DAYS: u32 = 366;
/// How many earlier years `years_data` looks back.
pub const YEARS_BACK: i16 = 5;

/// History payloads keyed by `(days, time bucket)`.
pub type HistoryCache = TtlCache<(u32, u64), HistoryPayload>;

/// The latest record, with display strings for the dashboard cards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub date: Date,
    pub percent: f64,
    pub delta: Option<f64>,
    pub comment: Option<String>,
    pub date_display: String,
    pub percent_display: String,
    pub delta_display: String,
}

pub fn latest_snapshot(
    archive: &GasStorageArchive,
    locale: Locale,
) -> Result<Snapshot, GasStorageError> {
    let conn = archive.connection()?;
    let record = archive
        .get_latest(&conn)?
        .ok_or_else(|| GasStorageError::NotFound("No data yet".to_string()))?;
    Ok(Snapshot {
        date: record.date,
        percent: round2(record.percent),
        delta: record.delta.map(round2),
        date_display: format_date(record.date, locale),
        percent_display: format_percent(record.percent, locale),
        delta_display: format_delta(record.delta, locale),
        comment: record.comment,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub date: Date,
    pub percent: f64,
    pub delta: Option<f64>,
}

impl From<&DailyRecord> for HistoryPoint {
    fn from(r: &DailyRecord) -> Self {
        HistoryPoint {
            date: r.date,
            percent: round2(r.percent),
            delta: r.delta.map(round2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrevYearPoint {
    pub date: Date,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub mean_delta: Option<f64>,
    pub net_change: Option<f64>,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPayload {
    pub records: Vec<HistoryPoint>,
    /// One entry per record, never null
    pub prev_year: Vec<PrevYearPoint>,
    pub stats: WindowStats,
    /// The same window in earlier years, keyed by year
    pub years_data: BTreeMap<i16, Vec<HistoryPoint>>,
}

/// Parse the `days` query value.  Anything outside 1..=366, missing or not
/// a number gives the default of 30.
pub fn clamp_days(raw: Option<&str>) -> u32 {
    match raw.and_then(|s| s.trim().parse::<u32>().ok()) {
        Some(n) if (1..=MAX_HISTORY_DAYS).contains(&n) => n,
        _ => DEFAULT_HISTORY_DAYS,
    }
}

pub fn window_stats(points: &[HistoryPoint]) -> WindowStats {
    let count = points.len();
    if count == 0 {
        return WindowStats {
            count,
            min: None,
            max: None,
            mean: None,
            mean_delta: None,
            net_change: None,
            trend: Trend::Flat,
        };
    }
    let min = points.iter().map(|p| p.percent).fold(f64::INFINITY, f64::min);
    let max = points.iter().map(|p| p.percent).fold(f64::NEG_INFINITY, f64::max);
    let mean = points.iter().map(|p| p.percent).sum::<f64>() / count as f64;
    let deltas: Vec<f64> = points.iter().filter_map(|p| p.delta).collect();
    let mean_delta = match deltas.len() {
        0 => None,
        n => Some(round2(deltas.iter().sum::<f64>() / n as f64)),
    };
    let net_change = round2(points[count - 1].percent - points[0].percent);
    let trend = if net_change.abs() < 0.1 {
        Trend::Flat
    } else if net_change > 0.0 {
        Trend::Up
    } else {
        Trend::Down
    };
    WindowStats {
        count,
        min: Some(round2(min)),
        max: Some(round2(max)),
        mean: Some(round2(mean)),
        mean_delta,
        net_change: Some(net_change),
        trend,
    }
}

/// The last `days` records, aligned with the year before.
///
/// `prev_year[i]` is the record 365 days before `records[i]`, or `baseline`
/// (the first percent of the window when absent) when that day is not stored.
pub fn get_history(
    archive: &GasStorageArchive,
    days: u32,
    baseline: Option<f64>,
) -> Result<HistoryPayload, GasStorageError> {
    let conn = archive.connection()?;
    let rows = archive.get_last_n(&conn, days)?;
    let records: Vec<HistoryPoint> = rows.iter().map(HistoryPoint::from).collect();
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Ok(HistoryPayload {
            records: vec![],
            prev_year: vec![],
            stats: window_stats(&[]),
            years_data: BTreeMap::new(),
        });
    };

    let mut prev_year = Vec::with_capacity(records.len());
    let baseline = round2(baseline.unwrap_or(first.percent));
    if let (Some(start), Some(end)) = (days_before(first.date, 365), days_before(last.date, 365)) {
        let by_date: BTreeMap<Date, f64> = archive
            .get_range(&conn, start, end)?
            .into_iter()
            .map(|r| (r.date, r.percent))
            .collect();
        for r in &records {
            if let Some(key) = days_before(r.date, 365) {
                prev_year.push(PrevYearPoint {
                    date: key,
                    percent: by_date.get(&key).map(|p| round2(*p)).unwrap_or(baseline),
                });
            }
        }
    }

    let mut years_data = BTreeMap::new();
    for k in 1..=YEARS_BACK {
        let (Some(start), Some(end)) = (shift_years(first.date, k), shift_years(last.date, k)) else {
            break;
        };
        let xs = archive.get_range(&conn, start, end)?;
        if !xs.is_empty() {
            years_data.insert(start.year(), xs.iter().map(HistoryPoint::from).collect());
        }
    }

    Ok(HistoryPayload {
        stats: window_stats(&records),
        records,
        prev_year,
        years_data,
    })
}

/// [`get_history`] through the cache.  A custom baseline bypasses it.
pub fn cached_history(
    archive: &GasStorageArchive,
    cache: &HistoryCache,
    days: u32,
    baseline: Option<f64>,
    now: SystemTime,
) -> Result<HistoryPayload, GasStorageError> {
    if baseline.is_some() {
        return get_history(archive, days, baseline);
    }
    let key = (days, cache.time_bucket(now));
    cache.get_or_try_insert_with(key, || get_history(archive, days, None))
}
