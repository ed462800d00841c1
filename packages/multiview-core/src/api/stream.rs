//! MPEG-TS streaming handler.
//!
//! Separated from the REST handlers because it owns a sink's whole lifecycle:
//! cold start, subscription, chunk pump-out, and eviction on disconnect.

use std::net::SocketAddr;
use std::time::Duration;

use async_stream::stream;
use axum::{
    body::Body,
    extract::{connect_info::ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::api::response::api_error;
use crate::api::AppState;
use crate::protocol_constants::SINK_DEQUEUE_TIMEOUT_SECS;

/// Unsubscribes its sink on drop, whatever reason the stream body ended for
/// (client disconnect, eviction, server shutdown).
struct SinkGuard {
    broadcaster: std::sync::Arc<crate::broadcaster::Broadcaster>,
    id: crate::broadcaster::SinkId,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

/// GET /stream
///
/// Cold-starts the session if idle, subscribes a sink, and streams MPEG-TS
/// chunks to the client until disconnect or eviction. Each dequeue has a 1s
/// timeout so a stalled encoder doesn't wedge the client task forever without
/// re-checking liveness.
pub(super) async fn stream_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> Response {
    if let Err(e) = state.supervisor.cold_start_if_idle().await {
        log::warn!("[Stream] cold start failed for {}: {}", remote_addr.ip(), e);
        return api_error(StatusCode::SERVICE_UNAVAILABLE, e.code(), e).into_response();
    }

    let sink = state.supervisor.broadcaster().subscribe();
    log::info!("[Stream] client {} connected, sink={:?}", remote_addr.ip(), sink.id);

    let guard = SinkGuard {
        broadcaster: std::sync::Arc::clone(state.supervisor.broadcaster()),
        id: sink.id,
    };

    let mut rx = sink.rx;
    let body_stream = stream! {
        let _guard = guard;
        loop {
            match tokio::time::timeout(Duration::from_secs(SINK_DEQUEUE_TIMEOUT_SECS), rx.recv()).await {
                Ok(Some(chunk)) => yield Ok::<Bytes, std::io::Error>(chunk),
                Ok(None) => break, // sink evicted or broadcaster gone
                Err(_) => continue, // 1s timeout, loop back and try again
            }
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp2t")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
