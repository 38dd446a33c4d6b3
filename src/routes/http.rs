// GET handlers: version, health, usage, top

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::ranking::rank;
use crate::window::{WindowSpec, WindowTotals};

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
pub(super) struct WindowQuery {
    window: Option<String>,
    n: Option<usize>,
}

impl WindowQuery {
    fn spec(&self) -> Result<WindowSpec, Response> {
        match self.window.as_deref() {
            None => Ok(WindowSpec::Today),
            Some(w) => w.parse().map_err(|e: crate::error::CommandError| {
                (
                    StatusCode::BAD_REQUEST,
                    axum::Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }),
        }
    }
}

fn internal(e: anyhow::Error) -> Response {
    tracing::warn!(error = %e, "query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

fn window_json(window: &WindowTotals) -> serde_json::Value {
    json!({
        "window": window.spec.to_string(),
        "label": window.label,
        "start": window.start.to_rfc3339(),
        "end": window.end.to_rfc3339(),
    })
}

/// GET /version: service name and version from Cargo.toml.
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /health: 200 when the store is readable and writable, 503 otherwise.
pub(super) async fn health_handler(State(state): State<AppState>) -> Response {
    match state.repo.health().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

/// GET /api/usage?window=today|week|month|Nh: per-node totals.
pub(super) async fn usage_handler(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Response {
    let spec = match query.spec() {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let window = match state.aggregator.aggregate(spec, Utc::now()).await {
        Ok(w) => w,
        Err(e) => return internal(e),
    };
    let mut body = window_json(&window);
    body["nodes"] = json!(window.nodes.values().collect::<Vec<_>>());
    body["total"] = json!(window.total());
    axum::Json(body).into_response()
}

/// GET /api/top?window=…&n=…: ranked by combined traffic.
pub(super) async fn top_handler(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Response {
    let spec = match query.spec() {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let n = query.n.unwrap_or(state.top_n);
    let (window, top) = match rank(&state.aggregator, spec, n, Utc::now()).await {
        Ok(r) => r,
        Err(e) => return internal(e),
    };
    let mut body = window_json(&window);
    body["top"] = json!(top);
    axum::Json(body).into_response()
}
