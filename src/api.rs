//! HTTP surface driving the reporting and triage core.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::app::{AppState, GpsDelivery};
use crate::error::ApiError;
use crate::geodesy::{Coordinate, EvacuationSite};
use crate::geolocation::{GeoFix, GeolocationError};
use crate::lifecycle::{Draft, ReportSession, VerificationMode};
use crate::report::{Report, ReportId, Severity, Status};
use crate::triage::{self, FeedFilter, MapView, TriageEntry};

type Shared = State<Arc<AppState>>;

pub fn router(state: Arc<AppState>) -> Router {
    // Allows the browser front end to talk to this API from anywhere
    let cors = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_origin(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/sites", get(list_sites))
        .route("/sessions", post(open_session))
        .route("/sessions/:id", get(get_session).delete(close_session))
        .route("/sessions/:id/gps", post(deliver_gps))
        .route("/sessions/:id/manual-location", post(confirm_manual_location))
        .route("/sessions/:id/severity", post(select_severity))
        .route("/sessions/:id/people", post(set_people_count))
        .route("/sessions/:id/verification", post(select_verification))
        .route("/sessions/:id/photo", post(set_photo))
        .route("/sessions/:id/sensor-check", post(start_sensor_check))
        .route("/sessions/:id/submit", post(submit))
        .route("/reports", get(list_reports))
        .route("/reports/:id", get(get_report))
        .route("/admin/feed", get(admin_feed))
        .route("/admin/reports/:id/dispatch", post(dispatch))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// --- API DTOs ---

#[derive(Serialize)]
struct SessionView {
    session_id: Uuid,
    draft: Draft,
    dispatch_notice: Option<DispatchNotice>,
}

#[derive(Serialize)]
struct DispatchNotice {
    report_id: ReportId,
    status: Status,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GpsPayload {
    Fix { lat: f64, lng: f64, accuracy: f64 },
    Failed { error: GeolocationError },
}

#[derive(Deserialize)]
struct SeverityRequest {
    severity: Severity,
}

#[derive(Deserialize)]
struct PeopleRequest {
    count: i64,
}

#[derive(Deserialize)]
struct VerificationRequest {
    mode: VerificationMode,
}

#[derive(Deserialize)]
struct PhotoRequest {
    attached: bool,
}

#[derive(Serialize)]
struct FeedResponse {
    entries: Vec<TriageEntry>,
    view: MapView,
}

// --- Handlers ---

fn find_session(state: &AppState, id: Uuid) -> Result<Arc<ReportSession>, ApiError> {
    state.session(id).ok_or(ApiError::SessionNotFound(id))
}

fn view(state: &AppState, id: Uuid, session: &ReportSession) -> Json<SessionView> {
    Json(SessionView {
        session_id: id,
        draft: session.draft(),
        dispatch_notice: state.dispatch_notice(id).map(|change| DispatchNotice {
            report_id: change.id,
            status: change.to,
        }),
    })
}

async fn list_sites(State(state): Shared) -> Json<Vec<EvacuationSite>> {
    Json(state.sites.clone())
}

async fn open_session(State(state): Shared) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let id = state.open_session()?;
    let session = find_session(&state, id)?;
    Ok((StatusCode::CREATED, view(&state, id, &session)))
}

async fn get_session(
    State(state): Shared,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let session = find_session(&state, id)?;
    Ok(view(&state, id, &session))
}

async fn close_session(State(state): Shared, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    if state.close_session(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

async fn deliver_gps(
    State(state): Shared,
    Path(id): Path<Uuid>,
    Json(payload): Json<GpsPayload>,
) -> Result<StatusCode, ApiError> {
    let result = match payload {
        GpsPayload::Fix { lat, lng, accuracy } => Ok(GeoFix {
            coordinate: Coordinate::new(lat, lng),
            accuracy,
        }
        .checked()?),
        GpsPayload::Failed { error } => Err(error),
    };
    match state.deliver_gps(id, result) {
        // Applied asynchronously by the session.
        Some(GpsDelivery::Delivered) => Ok(StatusCode::ACCEPTED),
        Some(GpsDelivery::AlreadyDelivered) => Err(ApiError::GpsAlreadyDelivered(id)),
        Some(GpsDelivery::Closed) => Err(ApiError::GeolocationClosed(id)),
        None => Err(ApiError::SessionNotFound(id)),
    }
}

async fn confirm_manual_location(
    State(state): Shared,
    Path(id): Path<Uuid>,
    Json(coordinate): Json<Coordinate>,
) -> Result<Json<SessionView>, ApiError> {
    let session = find_session(&state, id)?;
    session.confirm_manual_location(coordinate)?;
    Ok(view(&state, id, &session))
}

async fn select_severity(
    State(state): Shared,
    Path(id): Path<Uuid>,
    Json(req): Json<SeverityRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session = find_session(&state, id)?;
    session.select_severity(req.severity)?;
    Ok(view(&state, id, &session))
}

async fn set_people_count(
    State(state): Shared,
    Path(id): Path<Uuid>,
    Json(req): Json<PeopleRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session = find_session(&state, id)?;
    session.set_people_count(req.count)?;
    Ok(view(&state, id, &session))
}

async fn select_verification(
    State(state): Shared,
    Path(id): Path<Uuid>,
    Json(req): Json<VerificationRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session = find_session(&state, id)?;
    session.select_verification_mode(req.mode)?;
    Ok(view(&state, id, &session))
}

async fn set_photo(
    State(state): Shared,
    Path(id): Path<Uuid>,
    Json(req): Json<PhotoRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session = find_session(&state, id)?;
    session.set_photo_attached(req.attached)?;
    Ok(view(&state, id, &session))
}

async fn start_sensor_check(
    State(state): Shared,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let session = find_session(&state, id)?;
    session.start_sensor_check()?;
    Ok((StatusCode::ACCEPTED, view(&state, id, &session)))
}

async fn submit(
    State(state): Shared,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Report>), ApiError> {
    let report = state
        .submit(id)
        .ok_or(ApiError::SessionNotFound(id))??;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn list_reports(State(state): Shared) -> Json<Vec<Report>> {
    Json(state.store.all())
}

async fn get_report(
    State(state): Shared,
    Path(id): Path<ReportId>,
) -> Result<Json<Report>, ApiError> {
    state
        .store
        .find_by_id(id)
        .map(Json)
        .ok_or(ApiError::ReportNotFound(id))
}

async fn admin_feed(
    State(state): Shared,
    Query(filter): Query<FeedFilter>,
) -> Result<Json<FeedResponse>, ApiError> {
    let entries = triage::feed(&state.store, &state.sites, filter)?;
    let view = MapView::for_entries(&entries);
    Ok(Json(FeedResponse { entries, view }))
}

async fn dispatch(
    State(state): Shared,
    Path(id): Path<ReportId>,
) -> Result<Json<Report>, ApiError> {
    triage::dispatch(&state.store, &state.sites, id)?;
    state
        .store
        .find_by_id(id)
        .map(Json)
        .ok_or(ApiError::ReportNotFound(id))
}
