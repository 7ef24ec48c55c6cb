use std::time::SystemTime;

use actix_web::{
    get,
    http::header::{CACHE_CONTROL, CONTENT_DISPOSITION},
    web, HttpResponse,
};
use serde::Deserialize;

use crate::{
    config::Settings,
    db::agsi::{
        export::{export_window, ExportFormat},
        gas_storage_archive::GasStorageArchive,
        history::{cached_history, clamp_days, latest_snapshot, HistoryCache},
    },
    error::GasStorageError,
};

/// The latest fill level, with display strings.
/// http://127.0.0.1:8111/today
#[get("/today")]
pub async fn api_today(
    archive: web::Data<GasStorageArchive>,
    settings: web::Data<Settings>,
) -> Result<HttpResponse, GasStorageError> {
    let locale = settings.locale;
    let snapshot = web::block(move || latest_snapshot(&archive, locale)).await??;
    Ok(HttpResponse::Ok().json(snapshot))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    /// Number of days, 1 to 366.  Anything else gives 30.
    days: Option<String>,
    /// Stand-in for prior year days that are not stored
    baseline: Option<f64>,
}

/// http://127.0.0.1:8111/history?days=90
#[get("/history")]
pub async fn api_history(
    query: web::Query<HistoryQuery>,
    archive: web::Data<GasStorageArchive>,
    cache: web::Data<HistoryCache>,
) -> Result<HttpResponse, GasStorageError> {
    let days = clamp_days(query.days.as_deref());
    let baseline = query.baseline;
    let max_age = cache.ttl().as_secs();
    let payload = web::block(move || {
        cached_history(&archive, &cache, days, baseline, SystemTime::now())
    })
    .await??;
    Ok(HttpResponse::Ok()
        .insert_header((CACHE_CONTROL, format!("public, max-age={}", max_age)))
        .json(payload))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    /// `csv` (default), `xlsx` or `xls`
    fmt: Option<String>,
    days: Option<String>,
}

/// http://127.0.0.1:8111/export?fmt=xlsx&days=90
#[get("/export")]
pub async fn api_export(
    query: web::Query<ExportQuery>,
    archive: web::Data<GasStorageArchive>,
) -> Result<HttpResponse, GasStorageError> {
    let format: ExportFormat = query.fmt.as_deref().unwrap_or("csv").parse()?;
    let days = clamp_days(query.days.as_deref());
    let file = web::block(move || export_window(&archive, days, format)).await??;
    Ok(HttpResponse::Ok()
        .content_type(file.content_type)
        .insert_header((
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.filename),
        ))
        .body(file.bytes))
}
