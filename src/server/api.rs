//! api.rs — Rutas HTTP: /health, /grid/:grid_id, /coords, /search, /timestamps y /weather

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer};

use crate::grid::GridKey;
use crate::query::{
    available_timestamps, disambiguate, grid_report, resolve_coords, search_by_name,
    weather_in_bbox, BBox, DisambiguationPolicy, GridReport, NameResolution,
};
use crate::store::MemoryStore;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<MemoryStore>,
    pub grid_deg: f64,
    pub policy: DisambiguationPolicy,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/grid/:grid_id", get(get_grid))
        .route("/coords", get(get_coords))
        .route("/search", get(get_search))
        .route("/timestamps", get(get_timestamps))
        .route("/weather", get(get_weather))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}

async fn get_grid(State(state): State<ApiState>, Path(grid_id): Path<String>) -> Response {
    if GridKey::parse(&grid_id).is_none() {
        return (StatusCode::BAD_REQUEST, format!("GridID mal formado: {grid_id}")).into_response();
    }
    match grid_report(&state.store, &grid_id) {
        Some(r) => Json(r).into_response(),
        None => (StatusCode::NOT_FOUND, format!("sin datos para {grid_id}")).into_response(),
    }
}

#[derive(Deserialize)]
struct CoordsQ {
    lat: f64,
    lon: f64,
}

/// Respuesta común de /coords y /search.
#[derive(Serialize)]
struct Lookup {
    grid_id: Option<String>,
    resolution: Option<NameResolution>,
    report: Option<GridReport>,
}

async fn get_coords(State(state): State<ApiState>, Query(q): Query<CoordsQ>) -> Response {
    if !(-90.0..=90.0).contains(&q.lat) || !(-180.0..=180.0).contains(&q.lon) {
        return (StatusCode::BAD_REQUEST, "coordenadas fuera de rango").into_response();
    }
    let gid = resolve_coords(q.lat, q.lon, state.grid_deg);
    let report = grid_report(&state.store, &gid);
    let status = if report.is_some() { StatusCode::OK } else { StatusCode::NOT_FOUND };
    (status, Json(Lookup { grid_id: Some(gid), resolution: None, report })).into_response()
}

#[derive(Deserialize)]
struct SearchQ {
    name: String,
    /// Índice 1-based entre los candidatos
    choice: Option<usize>,
    /// Sobrescribe la política del servidor
    country: Option<String>,
}

async fn get_search(State(state): State<ApiState>, Query(q): Query<SearchQ>) -> Response {
    let policy = match q.country.filter(|c| !c.is_empty()) {
        Some(c) => DisambiguationPolicy::Country(c),
        None => state.policy.clone(),
    };
    let res = disambiguate(search_by_name(&state.store, q.name.trim()), &policy, q.choice);

    let (status, grid_id, report) = match &res {
        NameResolution::NotFound => (StatusCode::NOT_FOUND, None, None),
        // 300: el cliente debe repetir con `choice`
        NameResolution::Ambiguous(_) => (StatusCode::MULTIPLE_CHOICES, None, None),
        NameResolution::Resolved(c) => {
            (StatusCode::OK, Some(c.grid_id.clone()), grid_report(&state.store, &c.grid_id))
        }
    };
    (status, Json(Lookup { grid_id, resolution: Some(res), report })).into_response()
}

async fn get_timestamps(State(state): State<ApiState>) -> impl IntoResponse {
    Json(available_timestamps(&state.store))
}

#[derive(Deserialize)]
struct WeatherQ {
    timestamp: String,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

async fn get_weather(State(state): State<ApiState>, Query(q): Query<WeatherQ>) -> Response {
    let bbox = BBox { min_lat: q.min_lat, max_lat: q.max_lat, min_lon: q.min_lon, max_lon: q.max_lon };
    match weather_in_bbox(&state.store, &q.timestamp, &bbox, state.grid_deg) {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}
