//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the supervisor, catalog, or
//! broadcaster for business logic.

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::response::{api_error, api_success};
use crate::api::stream::stream_handler;
use crate::api::AppState;
use crate::catalog::Catalog;
use crate::error::MultiviewResult;
use crate::layout::LayoutConfig;

/// Creates the Axum router with all routes.
///
/// CORS is permissive: this server is meant to sit on a trusted LAN behind no
/// auth of its own, and is typically called from a browser-based remote page
/// served from a different origin.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/layout", post(apply_layout))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .route("/audio/volume", post(set_volume))
        .route("/audio/volumes", get(get_volumes))
        .route("/channels", get(list_channels))
        .route("/channels/refresh", post(refresh_channels))
        .route("/stream", get(stream_handler))
        .route("/proxy-image", get(proxy_image))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe: "is the process running?"
async fn healthz() -> impl IntoResponse {
    api_success(json!({ "status": "ok" }))
}

/// Maps slot->channel-id into slot->channel-name using the catalog, falling
/// back to the raw id for channels the catalog no longer has.
fn channel_names(catalog: &Catalog, slot_to_channel: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    slot_to_channel
        .iter()
        .map(|(slot, channel_id)| {
            let name = catalog
                .lookup(channel_id)
                .map(|c| c.name)
                .unwrap_or_else(|| channel_id.clone());
            (slot.clone(), name)
        })
        .collect()
}

/// POST /layout
async fn apply_layout(
    State(state): State<AppState>,
    Json(cfg): Json<LayoutConfig>,
) -> MultiviewResult<impl IntoResponse> {
    let normalized = state.supervisor.apply_layout(cfg).await?;
    let streams = channel_names(&state.catalog, &normalized.slot_to_channel);
    Ok(api_success(json!({
        "status": "live",
        "streams": streams,
        "audio_volumes": normalized.slot_volumes,
    })))
}

/// POST /stop
async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    state.supervisor.stop().await;
    api_success(json!({ "status": "idle" }))
}

/// GET /status
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let idle_timeout = std::time::Duration::from_secs(state.config.read().idle_timeout_secs);
    let snapshot = state.supervisor.status(idle_timeout).await;
    let profile = state.supervisor.encoder_profile();
    api_success(json!({
        "mode": snapshot.mode,
        "connected_clients": snapshot.connected_clients,
        "current_layout": snapshot.current_layout,
        "last_layout": snapshot.last_layout,
        "encoder": {
            "type": profile.codec,
            "name": profile.name,
            "codec": profile.codec,
            "preference": profile.preference,
        },
        "time_until_idle": snapshot.time_until_idle,
    }))
}

#[derive(Deserialize)]
struct VolumeRequest {
    slot_id: String,
    volume: f32,
}

/// POST /audio/volume
async fn set_volume(
    State(state): State<AppState>,
    Json(req): Json<VolumeRequest>,
) -> MultiviewResult<impl IntoResponse> {
    state.supervisor.set_volume(&req.slot_id, req.volume).await?;
    Ok(api_success(json!({
        "status": "live",
        "slot_id": req.slot_id,
        "volume": req.volume,
    })))
}

/// GET /audio/volumes
async fn get_volumes(State(state): State<AppState>) -> impl IntoResponse {
    let idle_timeout = std::time::Duration::from_secs(state.config.read().idle_timeout_secs);
    let snapshot = state.supervisor.status(idle_timeout).await;
    match snapshot.current_layout {
        Some(layout) => {
            let streams = channel_names(&state.catalog, &layout.slot_to_channel);
            api_success(json!({
                "volumes": layout.slot_volumes,
                "layout": layout.kind,
                "streams": streams,
            }))
            .into_response()
        }
        None => api_error(
            axum::http::StatusCode::BAD_REQUEST,
            "no_active_layout",
            "no active layout",
        )
        .into_response(),
    }
}

/// GET /channels
async fn list_channels(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "channels": state.catalog.snapshot() }))
}

/// POST /channels/refresh
async fn refresh_channels(State(state): State<AppState>) -> MultiviewResult<impl IntoResponse> {
    let count = state.catalog.refresh().await?;
    Ok(api_success(json!({ "status": "ok", "count": count })))
}

#[derive(Deserialize)]
struct ProxyImageParams {
    url: String,
}

/// GET /proxy-image?url=...
///
/// Pass-through image fetch so browser clients never need direct network
/// access to upstream channel-icon hosts. Not part of the stream-session
/// core; kept deliberately small.
async fn proxy_image(Query(params): Query<ProxyImageParams>) -> impl IntoResponse {
    use crate::protocol_constants::MAX_PROXY_IMAGE_BYTES;

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            return api_error(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e)
                .into_response()
        }
    };

    let resp = match client.get(&params.url).send().await {
        Ok(r) => r,
        Err(e) => {
            return api_error(axum::http::StatusCode::BAD_GATEWAY, "fetch_failed", e).into_response()
        }
    };

    let content_type = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let bytes = match resp.bytes().await {
        Ok(b) if b.len() as u64 <= MAX_PROXY_IMAGE_BYTES => b,
        Ok(_) => {
            return api_error(
                axum::http::StatusCode::PAYLOAD_TOO_LARGE,
                "image_too_large",
                "upstream image exceeded the size limit",
            )
            .into_response()
        }
        Err(e) => {
            return api_error(axum::http::StatusCode::BAD_GATEWAY, "fetch_failed", e).into_response()
        }
    };

    ([(axum::http::header::CONTENT_TYPE, content_type)], bytes).into_response()
}
