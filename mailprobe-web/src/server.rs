//! HTTP server and request handlers

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::{Stream, stream};
use mailprobe_common::presets;
use mailprobe_smtp::{Probe, parse_request};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{ProbeStats, Rejection, WebConfig, WebError};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    helo_name: Arc<str>,
    stats: Arc<ProbeStats>,
}

impl AppState {
    #[must_use]
    pub fn new(helo_name: &str, stats: Arc<ProbeStats>) -> Self {
        Self {
            helo_name: helo_name.into(),
            stats,
        }
    }

    fn probe(&self, body: &[u8]) -> Result<Probe, Rejection> {
        let config = parse_request(body)?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            security = %config.security,
            "SMTP test requested"
        );

        Ok(Probe::new(config)
            .with_helo_name(self.helo_name.as_ref())
            .observe(self.stats.clone()))
    }
}

/// Builds the router.
///
/// Probe endpoints run as long as the probe does; everything else must
/// answer within a few seconds.
pub fn router(state: AppState, cors: bool) -> Router {
    let quick = Router::new()
        .route("/health/live", get(liveness_handler))
        .route("/api/providers", get(providers_handler))
        .route("/api/providers/{id}", get(provider_handler))
        .route("/api/stats", get(stats_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(5)));

    let router = Router::new()
        .route("/api/smtp-test", post(smtp_test_handler))
        .route("/api/smtp-test-stream", post(smtp_test_stream_handler))
        .merge(quick)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// The probe's HTTP front
pub struct WebServer {
    listener: TcpListener,
    router: Router,
}

impl WebServer {
    /// Create a new web server
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn new(config: &WebConfig, stats: Arc<ProbeStats>) -> Result<Self, WebError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| WebError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            "Web server bound successfully"
        );

        let state = AppState::new(&config.helo_name, stats);
        Ok(Self {
            listener,
            router: router(state, config.cors),
        })
    }

    /// The address actually bound, useful when listening on port 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has gone away.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the web server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), WebError> {
        tracing::info!("Web server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Web server received shutdown signal");
            })
            .await
            .map_err(|e| WebError::ServerError(e.to_string()))?;

        tracing::info!("Web server stopped");
        Ok(())
    }
}

async fn liveness_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}

async fn providers_handler() -> Response {
    Json(presets::all().collect::<Vec<_>>()).into_response()
}

async fn provider_handler(Path(id): Path<String>) -> Response {
    presets::lookup(&id).map_or_else(
        || {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("Unknown provider: {id}") })),
            )
                .into_response()
        },
        |preset| Json(preset).into_response(),
    )
}

async fn stats_handler(State(state): State<AppState>) -> Response {
    Json(state.stats.snapshot()).into_response()
}

/// Runs a probe to completion and answers with the whole record.
///
/// A failed probe is still a `200`; only bodies that never became a probe
/// are client errors.
async fn smtp_test_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let probe = match state.probe(&body) {
        Ok(probe) => probe,
        Err(rejection) => return rejection.into_response(),
    };

    let result = probe.run_buffered().await;
    Json(json!({ "success": result.success, "result": result })).into_response()
}

/// Runs a probe and streams its events as they happen.
///
/// The body is validated before the stream opens. Closing the connection
/// aborts the probe.
async fn smtp_test_stream_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let probe = match state.probe(&body) {
        Ok(probe) => probe,
        Err(rejection) => return rejection.into_response(),
    };

    Sse::new(events(probe))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// One SSE frame per probe event, ending after `complete`.
fn events(probe: Probe) -> impl Stream<Item = Result<Event, axum::Error>> {
    let rx = probe.run_streaming();

    stream::unfold((rx, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        let event = rx.recv().await?;
        let done = event.is_complete();
        Some((Event::default().json_data(&event), (rx, done)))
    })
}
