use crate::live;
use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mitra_core::live::LiveConnector;
use mitra_core::{TurnOrchestrator, TurnRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

const TEST_SEARCH_DEFAULT_QUERY: &str = "JEE Main 2025 dates";
const TEST_SEARCH_LIMIT: usize = 3;

/// What `/health` reports about the running service.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub model: String,
    pub serpapi_configured: bool,
    pub google_cse_configured: bool,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub live: Arc<dyn LiveConnector>,
    pub info: Arc<ServiceInfo>,
}

pub fn build_app(state: AppState) -> Router {
    // Permissive CORS so a separately served frontend can reach the API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(chat))
        .route("/live-session", get(live::ws_handler))
        .route("/_debug/sessions", get(debug_sessions))
        .route("/health", get(health))
        .route("/test_search", get(test_search))
        .with_state(state)
        .layer(cors)
}

async fn chat(State(state): State<AppState>, Form(request): Form<TurnRequest>) -> Response {
    match state.orchestrator.handle_turn(request).await {
        Ok(reply) => Json(reply).into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response(),
    }
}

async fn debug_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.store().summaries())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model: String,
    search_apis: SearchApis,
}

#[derive(Debug, Serialize)]
struct SearchApis {
    serpapi: &'static str,
    google_cse: &'static str,
}

fn configured(flag: bool) -> &'static str {
    if flag { "configured" } else { "missing" }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model: state.info.model.clone(),
        search_apis: SearchApis {
            serpapi: configured(state.info.serpapi_configured),
            google_cse: configured(state.info.google_cse_configured),
        },
    })
}

#[derive(Debug, Deserialize)]
struct TestSearchParams {
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct TestSearchResponse {
    query: String,
    source: mitra_core::search::SearchSource,
    results_count: usize,
    results: Vec<mitra_core::search::SearchResult>,
}

async fn test_search(
    State(state): State<AppState>,
    Query(params): Query<TestSearchParams>,
) -> Json<TestSearchResponse> {
    let query = params
        .q
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| TEST_SEARCH_DEFAULT_QUERY.to_string());
    let outcome = state.orchestrator.search().search(&query, TEST_SEARCH_LIMIT).await;

    Json(TestSearchResponse {
        query,
        source: outcome.source,
        results_count: outcome.results.len(),
        results: outcome.results,
    })
}
