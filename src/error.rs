use actix_web::{error::BlockingError, http::StatusCode, HttpResponse, ResponseError};
use jiff::civil::Date;
use serde_json::json;
use thiserror::Error;

/// Everything that can go wrong in the ingest, recompute, query and export paths.
/// Handlers return it directly; the `ResponseError` impl turns it into a JSON
/// payload so the dashboard always gets an answer.
#[derive(Error, Debug)]
pub enum GasStorageError {
    #[error("{0} missing")]
    ConfigurationMissing(String),

    #[error("from_date ({requested}) is in the future, max available date is {max_available}")]
    FutureDateRequested { requested: Date, max_available: Date },

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("source fetch failed: {0}")]
    SourceFetchFailed(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GasStorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            GasStorageError::ConfigurationMissing(_) => "configuration_missing",
            GasStorageError::FutureDateRequested { .. } => "future_date_requested",
            GasStorageError::InvalidInput(_) => "invalid_input",
            GasStorageError::NotFound(_) => "not_found",
            GasStorageError::SourceFetchFailed(_) => "source_fetch_failed",
            GasStorageError::PersistenceFailed(_) => "db_error",
            GasStorageError::Internal(_) => "internal",
        }
    }
}

impl From<duckdb::Error> for GasStorageError {
    fn from(e: duckdb::Error) -> Self {
        GasStorageError::PersistenceFailed(e.to_string())
    }
}

impl From<r2d2::Error> for GasStorageError {
    fn from(e: r2d2::Error) -> Self {
        GasStorageError::PersistenceFailed(e.to_string())
    }
}

impl From<reqwest::Error> for GasStorageError {
    fn from(e: reqwest::Error) -> Self {
        GasStorageError::SourceFetchFailed(e.to_string())
    }
}

impl From<jiff::Error> for GasStorageError {
    fn from(e: jiff::Error) -> Self {
        GasStorageError::InvalidInput(e.to_string())
    }
}

impl From<BlockingError> for GasStorageError {
    fn from(e: BlockingError) -> Self {
        GasStorageError::Internal(e.to_string())
    }
}

impl ResponseError for GasStorageError {
    fn status_code(&self) -> StatusCode {
        match self {
            GasStorageError::ConfigurationMissing(_)
            | GasStorageError::FutureDateRequested { .. }
            | GasStorageError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GasStorageError::NotFound(_) => StatusCode::NOT_FOUND,
            GasStorageError::SourceFetchFailed(_)
            | GasStorageError::PersistenceFailed(_)
            | GasStorageError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            GasStorageError::FutureDateRequested {
                requested,
                max_available,
            } => json!({
                "ok": false,
                "error": self.kind(),
                "detail": self.to_string(),
                "from_date": requested,
                "max_available_date": max_available,
            }),
            _ => json!({
                "ok": false,
                "error": self.kind(),
                "detail": self.to_string(),
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
