//! Idempotent write endpoints, called by the daily job and by hand.  Each
//! accepts GET and POST, and clears the history cache once it has written.

use actix_web::{route, web, HttpResponse};
use jiff::civil::Date;
use log::info;
use serde::Deserialize;

use crate::{
    api::{ok_json, parse_flag},
    commentary::Commentator,
    config::Settings,
    db::agsi::{
        comments::{backfill_comments, refresh_latest, DEFAULT_BACKFILL_LIMIT},
        deltas::{recompute_all, recompute_last},
        gas_storage_archive::GasStorageArchive,
        history::HistoryCache,
        ingest::ingest_from_agsi,
    },
    error::GasStorageError,
};

#[derive(Debug, Deserialize)]
struct IngestQuery {
    /// `YYYY-MM-DD`.  If missing, the day after the last stored one.
    from: Option<String>,
}

/// http://127.0.0.1:8111/ingest?from=2025-01-01
#[route("/ingest", method = "GET", method = "POST")]
pub async fn api_ingest(
    query: web::Query<IngestQuery>,
    archive: web::Data<GasStorageArchive>,
    settings: web::Data<Settings>,
    commentator: web::Data<Commentator>,
    cache: web::Data<HistoryCache>,
) -> Result<HttpResponse, GasStorageError> {
    let from = match query.from.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(
            s.parse::<Date>()
                .map_err(|e| GasStorageError::InvalidInput(format!("Invalid from date {}: {}", s, e)))?,
        ),
        None => None,
    };
    let res = web::block(move || ingest_from_agsi(&archive, &settings, &commentator, from)).await?;
    // pages committed before a failure are visible too
    cache.clear();
    Ok(ok_json(res?))
}

#[derive(Debug, Deserialize)]
struct RefreshQuery {
    force: Option<String>,
}

/// http://127.0.0.1:8111/refresh-comment?force=true
#[route("/refresh-comment", method = "GET", method = "POST")]
pub async fn api_refresh_comment(
    query: web::Query<RefreshQuery>,
    archive: web::Data<GasStorageArchive>,
    commentator: web::Data<Commentator>,
    cache: web::Data<HistoryCache>,
) -> Result<HttpResponse, GasStorageError> {
    let force = parse_flag(query.force.as_deref());
    let report = web::block(move || refresh_latest(&archive, &commentator, force)).await??;
    if !report.skipped {
        cache.clear();
    }
    Ok(ok_json(report))
}

#[derive(Debug, Deserialize)]
struct RecomputeQuery {
    days: Option<String>,
}

/// Without `days` every row is recomputed.
/// http://127.0.0.1:8111/recompute-deltas?days=7
#[route("/recompute-deltas", method = "GET", method = "POST")]
pub async fn api_recompute_deltas(
    query: web::Query<RecomputeQuery>,
    archive: web::Data<GasStorageArchive>,
    cache: web::Data<HistoryCache>,
) -> Result<HttpResponse, GasStorageError> {
    let days = match query.days.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(
            s.parse::<i64>()
                .map_err(|_| GasStorageError::InvalidInput("days must be integer".to_string()))?,
        ),
        None => None,
    };
    let report = web::block(move || match days {
        Some(n) => recompute_last(&archive, n),
        None => recompute_all(&archive),
    })
    .await??;
    cache.clear();
    Ok(ok_json(report))
}

#[derive(Debug, Deserialize)]
struct BackfillQuery {
    limit: Option<u32>,
    force: Option<String>,
}

/// Fill missing comments of the last `limit` rows.  With `force` every one
/// of them is regenerated, which costs a backend call per row.
/// http://127.0.0.1:8111/backfill-comments?limit=60
#[route("/backfill-comments", method = "GET", method = "POST")]
pub async fn api_backfill_comments(
    query: web::Query<BackfillQuery>,
    archive: web::Data<GasStorageArchive>,
    commentator: web::Data<Commentator>,
    cache: web::Data<HistoryCache>,
) -> Result<HttpResponse, GasStorageError> {
    let limit = query.limit.unwrap_or(DEFAULT_BACKFILL_LIMIT);
    let force = parse_flag(query.force.as_deref());
    info!("Backfilling comments, limit {}, force {}", limit, force);
    let report =
        web::block(move || backfill_comments(&archive, &commentator, limit, force)).await??;
    cache.clear();
    Ok(ok_json(report))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};
    use jiff::civil::date;
    use serde_json::Value;

    use crate::api::{configure, testing};

    use super::*;

    #[actix_web::test]
    async fn ingest_without_api_key() {
        let state = testing::state(GasStorageArchive::in_memory().unwrap());
        let app = test::init_service(App::new().configure(|cfg| configure(&state, cfg))).await;
        let req = test::TestRequest::post().uri("/ingest").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let v: Value = test::read_body_json(res).await;
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "configuration_missing");
    }

    #[actix_web::test]
    async fn failed_ingest_clears_history_cache() {
        let archive = GasStorageArchive::in_memory().unwrap();
        archive.seed(&[(date(2025, 1, 10), 81.23)]).unwrap();
        let state = testing::state(archive);
        let app = test::init_service(App::new().configure(|cfg| configure(&state, cfg))).await;

        let req = test::TestRequest::get().uri("/history?days=30").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(state.history_cache.len(), 1);

        let req = test::TestRequest::post().uri("/ingest").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(state.history_cache.is_empty());
    }

    #[actix_web::test]
    async fn ingest_rejects_bad_date() {
        let state = testing::state(GasStorageArchive::in_memory().unwrap());
        let app = test::init_service(App::new().configure(|cfg| configure(&state, cfg))).await;
        let req = test::TestRequest::get().uri("/ingest?from=2025-13-01").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn recompute_and_refresh() {
        let archive = GasStorageArchive::in_memory().unwrap();
        archive
            .seed(&[(date(2025, 1, 9), 80.0), (date(2025, 1, 10), 81.23)])
            .unwrap();
        let state = testing::state(archive);
        let app = test::init_service(App::new().configure(|cfg| configure(&state, cfg))).await;

        let req = test::TestRequest::post().uri("/recompute-deltas").to_request();
        let v: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(v["ok"], true);
        assert_eq!(v["mode"], "full");
        assert_eq!(v["changed"], 2);

        let req = test::TestRequest::get().uri("/recompute-deltas?days=7").to_request();
        let v: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(v["mode"], "last_7_days");

        let req = test::TestRequest::get().uri("/refresh-comment").to_request();
        let v: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(v["skipped"], false);
        assert_eq!(v["date"], "2025-01-10");
        assert_eq!(v["delta"], 1.23);

        let req = test::TestRequest::get().uri("/refresh-comment").to_request();
        let v: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(v["skipped"], true);

        let req = test::TestRequest::post().uri("/backfill-comments?limit=5").to_request();
        let v: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(v["updated"], 1);
    }

    #[actix_web::test]
    async fn recompute_rejects_bad_days() {
        let state = testing::state(GasStorageArchive::in_memory().unwrap());
        let app = test::init_service(App::new().configure(|cfg| configure(&state, cfg))).await;
        for uri in ["/recompute-deltas?days=x", "/recompute-deltas?days=0"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }
    }
}
