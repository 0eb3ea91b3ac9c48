use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::geodesy::{GeoError, InvalidLocation};
use crate::lifecycle::LifecycleError;
use crate::report::ReportId;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("report {0} not found")]
    ReportNotFound(ReportId),
    #[error("session {0} already received a location fix")]
    GpsAlreadyDelivered(Uuid),
    #[error("session {0} is no longer waiting for a location fix")]
    GeolocationClosed(Uuid),
    #[error("invalid location: {0}")]
    InvalidLocation(#[from] InvalidLocation),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Geo(#[from] GeoError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            Self::ReportNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::GpsAlreadyDelivered(_) => (StatusCode::CONFLICT, "GPS_ALREADY_DELIVERED"),
            Self::GeolocationClosed(_) => (StatusCode::CONFLICT, "GEOLOCATION_CLOSED"),
            Self::InvalidLocation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_LOCATION"),
            Self::Lifecycle(err) => match err {
                LifecycleError::MissingSeverity => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "MISSING_SEVERITY")
                }
                LifecycleError::NegativePeopleCount(_) | LifecycleError::PeopleCountTooLarge(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_PEOPLE_COUNT")
                }
                LifecycleError::InvalidLocation(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_LOCATION")
                }
                LifecycleError::InvalidPhase { .. } => (StatusCode::CONFLICT, "INVALID_PHASE"),
                LifecycleError::Store(err) => store_status(err),
            },
            Self::Store(err) => store_status(err),
            Self::Geo(GeoError::EmptySiteList) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "EMPTY_SITE_LIST")
            }
        }
    }
}

fn store_status(err: &StoreError) -> (StatusCode, &'static str) {
    match err {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        StoreError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        StoreError::DuplicateId(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DUPLICATE_ID"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(code, error = %self, "internal error");
        }
        (status, Json(json!({ "error": self.to_string(), "code": code }))).into_response()
    }
}
