// Read-only HTTP surface: health and usage queries

mod http;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::history_repo::HistoryRepo;
use crate::window::WindowAggregator;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) aggregator: Arc<WindowAggregator>,
    pub(crate) repo: Arc<HistoryRepo>,
    pub(crate) top_n: usize,
}

pub fn app(repo: Arc<HistoryRepo>, top_n: usize) -> Router {
    let state = AppState {
        aggregator: Arc::new(WindowAggregator::new(repo.clone())),
        repo,
        top_n,
    };
    Router::new()
        .route("/", get(|| async { "traffic-reporter" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/health", get(http::health_handler)) // GET /health
        .route("/api/usage", get(http::usage_handler)) // GET /api/usage?window=
        .route("/api/top", get(http::top_handler)) // GET /api/top?window=&n=
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
