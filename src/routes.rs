//! HTTP endpoints

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    database::SpotStore,
    errors::TrackerError,
    models::{LabeledSpot, Lot, Spot},
    uplink::{self, UplinkEnvelope},
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SpotStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn SpotStore>) -> Self {
        Self { store }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/uplink", post(receive_uplink))
        .route("/api/spots", get(list_spots).post(replace_spots))
        .route("/api/lots", get(list_lots).post(create_lot))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Error response, `{ "error": message }`
pub struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TrackerError::MalformedRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackerError::MalformedUplink(_)
            | TrackerError::MalformedRequest(_)
            | TrackerError::InvalidLot(_)
            | TrackerError::InvalidSpotId(_) => StatusCode::BAD_REQUEST,
            TrackerError::LotExists(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct UplinkResponse {
    pub success: bool,
    pub observations: usize,
    pub updated: u64,
    #[serde(rename = "receivedBody")]
    pub received_body: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpotsBody<T> {
    pub spots: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct ReplaceResponse {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct LotsResponse {
    pub lots: Vec<Lot>,
}

/// `GET /health`
async fn health() -> &'static str {
    "ok"
}

/// `POST /api/uplink`: decode a sensor uplink and apply it to the spots.
///
/// The body is read raw so gateways that omit `content-type` still work.
async fn receive_uplink(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UplinkResponse>, ApiError> {
    let received_body: Value = serde_json::from_slice(&body)
        .map_err(|e| TrackerError::MalformedUplink(e.to_string()))?;
    let envelope = UplinkEnvelope::from_value(received_body.clone())?;

    let report = uplink::ingest(state.store.as_ref(), &envelope).await?;
    info!(
        device_id = envelope.device_id().unwrap_or("unknown"),
        observations = report.observations,
        updated = report.updated,
        "Ingested uplink"
    );

    Ok(Json(UplinkResponse {
        success: true,
        observations: report.observations,
        updated: report.updated,
        received_body,
    }))
}

/// `GET /api/spots`
async fn list_spots(State(state): State<AppState>) -> Result<Json<SpotsBody<Spot>>, ApiError> {
    let spots = state.store.list_spots().await?;
    Ok(Json(SpotsBody { spots }))
}

/// `POST /api/spots`: replace every spot with the annotated set.
async fn replace_spots(
    State(state): State<AppState>,
    body: Result<Json<SpotsBody<LabeledSpot>>, JsonRejection>,
) -> Result<Json<ReplaceResponse>, ApiError> {
    let Json(body) = body?;
    let count = state.store.replace_all_spots(&body.spots).await?;
    Ok(Json(ReplaceResponse {
        success: true,
        count,
    }))
}

/// `GET /api/lots`
async fn list_lots(State(state): State<AppState>) -> Result<Json<LotsResponse>, ApiError> {
    let lots = state.store.list_lots().await?;
    Ok(Json(LotsResponse { lots }))
}

/// `POST /api/lots`: create a lot unless the name is taken.
async fn create_lot(
    State(state): State<AppState>,
    body: Result<Json<Lot>, JsonRejection>,
) -> Result<(StatusCode, Json<Lot>), ApiError> {
    let Json(lot) = body?;
    lot.validate()?;
    state.store.create_lot(&lot).await?;
    Ok((StatusCode::CREATED, Json(lot)))
}
