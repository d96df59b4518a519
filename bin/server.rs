// 🌐 Municipal Education Statistics - Web Server
// JSON endpoints over the merged table, built once at startup

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use municipal_edu_stats::export::{self, YearView};
use municipal_edu_stats::config::parse_flag;
use municipal_edu_stats::{logging, InputPaths, Pipeline, PipelineConfig, Table};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_BAR: &str = "Total enrollment";
const DEFAULT_LINE: &str = "Education expenses";

/// Shared application state
#[derive(Clone)]
struct AppState {
    merged: Arc<Table>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Deserialize)]
struct SeriesQuery {
    bar: Option<String>,
    line: Option<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/merged - year → column → municipality
async fn get_merged(State(state): State<AppState>) -> Json<ApiResponse<YearView>> {
    Json(ApiResponse::ok(export::by_year(&state.merged)))
}

/// GET /api/columns
async fn get_columns(State(state): State<AppState>) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(state.merged.columns().to_vec()))
}

/// GET /api/cities
async fn get_cities(State(state): State<AppState>) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(export::municipalities(&state.merged)))
}

/// GET /api/cities/complete
async fn get_complete_cities(State(state): State<AppState>) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(export::complete_municipalities(&state.merged)))
}

/// GET /api/cities/:city/series?bar=..&line=..
async fn get_city_series(
    State(state): State<AppState>,
    Path(city): Path<String>,
    Query(query): Query<SeriesQuery>,
) -> impl IntoResponse {
    let bar = query.bar.as_deref().unwrap_or(DEFAULT_BAR);
    let line = query.line.as_deref().unwrap_or(DEFAULT_LINE);

    match export::city_series(&state.merged, &city, bar, line) {
        Some(series) => (StatusCode::OK, Json(ApiResponse::ok(series))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::err(format!(
                "no series for '{}' with columns '{}' and '{}'",
                city, bar, line
            ))),
        )
            .into_response(),
    }
}

// ============================================================================
// Main Server
// ============================================================================

fn build_merged() -> anyhow::Result<Table> {
    let data_dir = std::env::var("EDU_STATS_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."));
    let mut config = match std::env::var("EDU_STATS_CONFIG") {
        Ok(path) => PipelineConfig::from_file(&path).with_context(|| format!("Failed to load config {}", path))?,
        Err(_) => PipelineConfig::default(),
    };
    // the charts are fed complete rows unless told otherwise
    config.full_data_only = match std::env::var("EDU_STATS_FULL_DATA_ONLY") {
        Ok(raw) => parse_flag(&raw).context("Invalid EDU_STATS_FULL_DATA_ONLY")?,
        Err(_) => true,
    };

    let pipeline = Pipeline::new(config).context("Invalid pipeline configuration")?;
    let paths = InputPaths::discover(&data_dir)
        .with_context(|| format!("Failed to find input files in {}", data_dir.display()))?;
    let output = pipeline.run(&paths).context("Pipeline run failed")?;
    Ok(output.merged)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("info");

    let merged = build_merged()?;
    info!(rows = merged.len(), columns = merged.columns().len(), "merged table ready");

    let state = AppState {
        merged: Arc::new(merged),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/merged", get(get_merged))
        .route("/columns", get(get_columns))
        .route("/cities", get(get_cities))
        .route("/cities/complete", get(get_complete_cities))
        .route("/cities/:city/series", get(get_city_series))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = std::env::var("EDU_STATS_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(addr = %addr, "server listening");
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
