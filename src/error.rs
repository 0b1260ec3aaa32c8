use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Shared message constants so handlers and tests agree on wording.
pub mod msg {
    pub const TRACK_NOT_FOUND: &str = "Track not found";
    pub const ACCOUNT_NOT_FOUND: &str = "Account not found";
    pub const PURCHASE_NOT_FOUND: &str = "Purchase not found";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
    pub const TRACK_LOCKED: &str = "Track is currently being purchased";
    pub const EMPTY_LICENSE_CATALOG: &str = "License catalog is empty";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resolved license cannot cover an exclusive track.
    #[error("License {license_id} does not allow exclusive use of track {track_id}")]
    LicenseIncompatible {
        license_id: String,
        track_id: String,
    },

    /// Exclusive inventory already consumed by another purchase.
    #[error("Track already sold: {0}")]
    TrackAlreadySold(String),

    /// Event payload lacks a field the orchestration cannot proceed without.
    #[error("Missing required metadata: {0}")]
    MissingMetadata(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a redelivery of the triggering event could possibly succeed.
    ///
    /// Terminal errors mark the ledger row processed with the error recorded;
    /// non-terminal errors release the lease for a later redelivery to reclaim.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppError::LicenseIncompatible { .. }
                | AppError::TrackAlreadySold(_)
                | AppError::MissingMetadata(_)
                | AppError::BadRequest(_)
                | AppError::NotFound(_)
                | AppError::Json(_)
        )
    }
}

/// Extension for the common `Option -> NotFound` conversion in handlers.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "Not found", Some(m.clone())),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "Bad request", Some(m.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "Conflict", Some(m.clone())),
            AppError::LicenseIncompatible { .. } => (
                StatusCode::CONFLICT,
                "License incompatible",
                Some(self.to_string()),
            ),
            AppError::TrackAlreadySold(m) => {
                (StatusCode::CONFLICT, "Track already sold", Some(m.clone()))
            }
            AppError::MissingMetadata(field) => (
                StatusCode::BAD_REQUEST,
                "Missing metadata",
                Some((*field).to_string()),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(m) => {
                tracing::error!("Internal error: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
