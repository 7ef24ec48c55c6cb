pub mod admin;
pub mod agsi;

use actix_web::{
    web::{self, Data},
    HttpResponse,
};
use serde::Serialize;

use crate::{
    commentary::Commentator, config::Settings, db::agsi::gas_storage_archive::GasStorageArchive,
    db::agsi::history::HistoryCache, error::GasStorageError,
};

/// Everything the handlers share.  Cloning is cheap, each field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub archive: Data<GasStorageArchive>,
    pub settings: Data<Settings>,
    pub commentator: Data<Commentator>,
    pub history_cache: Data<HistoryCache>,
}

impl AppState {
    pub fn new(archive: GasStorageArchive, settings: Settings, commentator: Commentator) -> AppState {
        let history_cache = HistoryCache::new(settings.history_cache_ttl);
        AppState {
            archive: Data::new(archive),
            settings: Data::new(settings),
            commentator: Data::new(commentator),
            history_cache: Data::new(history_cache),
        }
    }
}

/// Register the app data and every endpoint.
pub fn configure(state: &AppState, cfg: &mut web::ServiceConfig) {
    cfg.app_data(state.archive.clone())
        .app_data(state.settings.clone())
        .app_data(state.commentator.clone())
        .app_data(state.history_cache.clone())
        .app_data(web::QueryConfig::default().error_handler(|e, _| {
            GasStorageError::InvalidInput(e.to_string()).into()
        }))
        // Dashboard
        .service(agsi::dashboard::index)
        // Queries
        .service(agsi::gas_storage::api_today)
        .service(agsi::gas_storage::api_history)
        .service(agsi::gas_storage::api_export)
        // Maintenance
        .service(agsi::maintenance::api_ingest)
        .service(agsi::maintenance::api_refresh_comment)
        .service(agsi::maintenance::api_recompute_deltas)
        .service(agsi::maintenance::api_backfill_comments)
        // Admin
        .service(admin::status::api_health)
        .service(admin::status::api_db_stats);
}

#[derive(Serialize)]
struct OkBody<T> {
    ok: bool,
    #[serde(flatten)]
    body: T,
}

/// A 200 with `{"ok": true, ...body}`.
pub fn ok_json<T: Serialize>(body: T) -> HttpResponse {
    HttpResponse::Ok().json(OkBody { ok: true, body })
}

/// Lenient boolean query values: `1`, `true`, `yes`, `on`.
pub fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// State over an in-memory store, no API keys.
    pub(crate) fn state(archive: GasStorageArchive) -> AppState {
        AppState::new(archive, Settings::default(), Commentator::offline())
    }
}
