use actix_web::{get, web, HttpResponse};
use serde_json::json;

use crate::{
    api::ok_json, db::agsi::gas_storage_archive::GasStorageArchive, error::GasStorageError,
};

/// http://127.0.0.1:8111/health
#[get("/health")]
pub async fn api_health(
    archive: web::Data<GasStorageArchive>,
) -> Result<HttpResponse, GasStorageError> {
    web::block(move || -> Result<(), GasStorageError> {
        let conn = archive.connection()?;
        conn.execute_batch("SELECT 1;")?;
        Ok(())
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({"ok": true})))
}

/// Row count and the most recent day.
/// http://127.0.0.1:8111/db-stats
#[get("/db-stats")]
pub async fn api_db_stats(
    archive: web::Data<GasStorageArchive>,
) -> Result<HttpResponse, GasStorageError> {
    let stats = web::block(move || -> Result<_, GasStorageError> {
        let conn = archive.connection()?;
        Ok(archive.stats(&conn)?)
    })
    .await??;
    Ok(ok_json(stats))
}
