//! Tracking endpoint handler.
//!
//! The handler is built so the mail client always gets a pixel back:
//! 1. Read `id` from the raw query string (never rejects the request)
//! 2. Flag the matching entry as read, if there is one
//! 3. Return the transparent PNG with caching disabled

use std::sync::Arc;

use axum::{
    extract::{RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::campaign::{CampaignLog, FlagUpdate};
use crate::web::pixel::PIXEL_PNG;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub log: Arc<CampaignLog>,
}

impl AppState {
    pub fn new(log: Arc<CampaignLog>) -> Self {
        Self { log }
    }
}

/// `GET /track?id=<uuid>`
///
/// Always answers 200 with the pixel, whether the id is missing, malformed or
/// unknown.
pub async fn track(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let raw_id = query.as_deref().and_then(id_param);

    match raw_id.as_deref().map(Uuid::parse_str) {
        Some(Ok(id)) => mark_read(&state, id).await,
        Some(Err(e)) => {
            warn!(raw_id = ?raw_id, error = %e, "track_malformed_id");
        }
        None => {
            info!("track_missing_id");
        }
    }

    pixel_response()
}

async fn mark_read(state: &AppState, id: Uuid) {
    let log = Arc::clone(&state.log);

    // Own task, so a client hanging up mid-request cannot cancel the write
    let result = tokio::spawn(async move { log.update_flags(id, FlagUpdate::read()).await }).await;

    match result {
        Ok(Ok(true)) => info!(id = %id, "track_open_recorded"),
        Ok(Ok(false)) => info!(id = %id, "track_unknown_id"),
        Ok(Err(e)) => error!(id = %id, error = %e, "track_update_failed"),
        Err(e) => error!(id = %id, error = %e, "track_update_task_failed"),
    }
}

/// First `id` parameter of a query string, percent-decoded.
fn id_param(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
}

/// The fixed pixel response.
pub fn pixel_response() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        PIXEL_PNG,
    )
        .into_response()
}
