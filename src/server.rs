//! HTTP control surface: the popup-style control envelope plus status and
//! Prometheus metrics.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use adrush_core_types::{ControlRequest, ControlResponse};

use crate::control;
use crate::metrics;
use crate::supervisor::MonitorSupervisor;

#[derive(Clone)]
struct AppState {
    supervisor: Arc<MonitorSupervisor>,
    registry: Arc<Registry>,
}

pub fn router(supervisor: Arc<MonitorSupervisor>) -> Router {
    let state = AppState {
        supervisor,
        registry: Arc::new(metrics::global_registry().clone()),
    };
    Router::new()
        .route("/control", post(control_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

pub fn spawn_control_server(
    addr: SocketAddr,
    supervisor: Arc<MonitorSupervisor>,
) -> JoinHandle<()> {
    let app = router(supervisor);
    info!(%addr, "control server listening");
    tokio::spawn(async move {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                    error!(?err, "control server exited with error");
                }
            }
            Err(err) => {
                error!(?err, "failed to bind control listener");
            }
        }
    })
}

async fn control_handler(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Json<ControlResponse> {
    Json(control::dispatch(&state.supervisor, request).await)
}

async fn status_handler(State(state): State<AppState>) -> Json<ControlResponse> {
    Json(control::dispatch(&state.supervisor, ControlRequest::GetStatus).await)
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let format_type = encoder.format_type().to_string();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "metric encode error",
        )
            .into_response();
    }

    match (String::from_utf8(buffer), HeaderValue::from_str(&format_type)) {
        (Ok(body), Ok(content_type)) => {
            ([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response()
        }
        (body, header) => {
            error!(body_ok = body.is_ok(), header_ok = header.is_ok(), "failed to render metrics");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response()
        }
    }
}
