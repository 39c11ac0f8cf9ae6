//! HTTP API handlers for emitterscope.
//!
//! Every filtered endpoint accepts the same query parameters: `filters` and
//! `enabled` (JSON objects), `limit`, `offset`, `sort`, `order` and `bssids`
//! (JSON array). Requests are validated completely before any statement is
//! compiled, and every success envelope carries `filterTransparency`.
//!
//! Logs carry counts and durations only. Filter values are never logged.

use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::compiler::{CompileOptions, QueryShape, compile, compile_analytics, compile_severity_counts};
use crate::config::DEFAULT_RENDER_BUDGET;
use crate::dashboard::{DashboardResponse, load_dashboard};
use crate::error::ApiError;
use crate::model::{
    AnalyticsResponse, CountResponse, FilterParams, GeospatialResponse, HomeLocation,
    NetworkListResponse, ObservationsResponse, Pagination, SeverityCountsResponse,
};
use crate::storage::Storage;
use crate::transparency;
use crate::validation::{LimitPolicy, ValidatedFilters, ValidatedRequest, validate_json, validate_request};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    /// Ceiling for geospatial `limit`.
    pub render_budget: u32,
}

impl AppState {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            render_budget: DEFAULT_RENDER_BUDGET,
        }
    }
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v2/networks/filtered", get(list_networks))
        .route("/api/v2/networks/filtered/count", get(count_networks))
        .route("/api/v2/networks/filtered/geospatial", get(get_geospatial))
        .route("/api/v2/networks/filtered/observations", get(get_observations))
        .route("/api/v2/networks/filtered/analytics", get(get_analytics))
        .route("/api/v2/threats/severity-counts", get(get_severity_counts))
        .route("/api/dashboard-metrics", get(get_dashboard_metrics))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the home location when a distance filter needs it.
///
/// Fails with `home_location_required` before any filtered statement runs.
async fn resolve_home(
    state: &AppState,
    filters: &ValidatedFilters,
) -> Result<Option<HomeLocation>, ApiError> {
    if !filters.enabled.requires_home() {
        return Ok(None);
    }
    match state.storage.home_location().await? {
        Some(home) => Ok(Some(home)),
        None => {
            warn!("Distance filter enabled without a home location");
            Err(ApiError::HomeLocationRequired)
        }
    }
}

fn compile_options(
    request: &ValidatedRequest,
    params: &FilterParams,
    home: Option<HomeLocation>,
) -> CompileOptions {
    CompileOptions {
        now: Utc::now(),
        home,
        limit: request.limit,
        offset: request.offset,
        selection: request.selection.clone(),
        sort: params.sort.clone(),
        order: params.order.clone(),
    }
}

/// Options for shapes without pagination.
fn unpaged_options(home: Option<HomeLocation>) -> CompileOptions {
    CompileOptions {
        home,
        ..CompileOptions::default()
    }
}

/// GET /api/v2/networks/filtered - One page of matching emitters.
///
/// # Response
///
/// ```json
/// {
///     "ok": true,
///     "data": [{ "bssid": "AA:BB:CC:00:11:22", "type": "W", "threatReasons": [] }],
///     "pagination": { "total": 1, "limit": 500, "offset": 0, "hasMore": false },
///     "filterTransparency": { "appliedFilters": [], "ignoredFilters": [], "warnings": [] },
///     "threatValidation": { "threatsWithoutReasons": 0, "totalThreats": 0 }
/// }
/// ```
#[instrument(skip(state, params))]
pub async fn list_networks(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<NetworkListResponse>, ApiError> {
    let started = Instant::now();
    let request = validate_request(&params, LimitPolicy::LIST)?;
    let home = resolve_home(&state, &request.filters).await?;
    let options = compile_options(&request, &params, home);
    let ValidatedFilters { filters, enabled } = &request.filters;

    let list = compile(filters, enabled, QueryShape::List, &options);
    let count = compile(filters, enabled, QueryShape::Count, &options);

    let (page, total) = tokio::try_join!(
        state.storage.fetch_networks(&list),
        state.storage.fetch_count(&count),
    )
    .inspect_err(|e| warn!(error = %e, "Failed to list networks"))?;

    let mut rows = page.rows;
    let threat_validation = transparency::enrich(&mut rows);

    info!(
        rows = rows.len(),
        total,
        applied = list.applied_filters.len(),
        ignored = list.ignored_filters.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Networks listed"
    );

    Ok(Json(NetworkListResponse {
        ok: true,
        data: rows,
        pagination: Pagination::new(total, request.limit, request.offset),
        filter_transparency: list.transparency(),
        threat_validation,
    }))
}

/// GET /api/v2/networks/filtered/count - Number of matching emitters.
#[instrument(skip(state, params))]
pub async fn count_networks(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<CountResponse>, ApiError> {
    let validated = validate_json(params.filters.as_deref(), params.enabled.as_deref())?;
    let home = resolve_home(&state, &validated).await?;

    let count = compile(
        &validated.filters,
        &validated.enabled,
        QueryShape::Count,
        &unpaged_options(home),
    );
    let total = state
        .storage
        .fetch_count(&count)
        .await
        .inspect_err(|e| warn!(error = %e, "Failed to count networks"))?;

    info!(total, applied = count.applied_filters.len(), "Networks counted");

    Ok(Json(CountResponse {
        ok: true,
        total,
        filter_transparency: count.transparency(),
    }))
}

/// GET /api/v2/networks/filtered/geospatial - Located observations as a
/// GeoJSON feature collection.
///
/// With a non-empty `bssids` selection, the selection alone decides which
/// emitters are drawn.
#[instrument(skip(state, params))]
pub async fn get_geospatial(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<GeospatialResponse>, ApiError> {
    let started = Instant::now();
    let request = validate_request(&params, LimitPolicy::geospatial(state.render_budget))?;
    let home = if request.selection.is_empty() {
        resolve_home(&state, &request.filters).await?
    } else {
        None
    };
    let options = compile_options(&request, &params, home);

    let query = compile(
        &request.filters.filters,
        &request.filters.enabled,
        QueryShape::Geospatial,
        &options,
    );
    let (features, truncated) = state
        .storage
        .fetch_features(&query, request.limit)
        .await
        .inspect_err(|e| warn!(error = %e, "Failed to load geospatial features"))?;

    if truncated {
        warn!(limit = request.limit, "Geospatial response truncated at limit");
    }
    let without_reasons = features
        .iter()
        .filter(|f| f.properties.threat_transparency_error)
        .count();
    if without_reasons > 0 {
        warn!(
            threats_without_reasons = without_reasons,
            "Threat features without reasons in response"
        );
    }
    info!(
        features = features.len(),
        truncated,
        selection = request.selection.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Geospatial features loaded"
    );

    Ok(Json(GeospatialResponse {
        ok: true,
        kind: "FeatureCollection",
        features,
        truncated,
        limit: request.limit,
        filter_transparency: query.transparency(),
    }))
}

/// GET /api/v2/networks/filtered/observations - Raw sightings of the
/// selected emitters.
///
/// Requires a non-empty `bssids` selection. Emitter-level filters do not
/// apply to individual sightings and are reported as unsupported, so no
/// home location is needed here.
#[instrument(skip(state, params))]
pub async fn get_observations(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<ObservationsResponse>, ApiError> {
    let request = validate_request(&params, LimitPolicy::OBSERVATIONS)?;
    let options = compile_options(&request, &params, None);
    let ValidatedFilters { filters, enabled } = &request.filters;

    let rows_query = compile(filters, enabled, QueryShape::Observations, &options);
    let count_query = compile(filters, enabled, QueryShape::ObservationCount, &options);

    let (rows, total) = tokio::try_join!(
        state.storage.fetch_observations(&rows_query),
        state.storage.fetch_count(&count_query),
    )
    .inspect_err(|e| warn!(error = %e, "Failed to load observations"))?;

    info!(
        rows = rows.len(),
        total,
        selection = request.selection.len(),
        "Observations loaded"
    );

    Ok(Json(ObservationsResponse {
        ok: true,
        rows,
        pagination: Pagination::new(total, request.limit, request.offset),
        filter_transparency: rows_query.transparency(),
    }))
}

/// GET /api/v2/networks/filtered/analytics - The analytics bundle.
///
/// All statements run in one transaction under the analytics timeout;
/// expiry yields 504 `analytics_timeout` and no partial data.
#[instrument(skip(state, params))]
pub async fn get_analytics(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let started = Instant::now();
    let validated = validate_json(params.filters.as_deref(), params.enabled.as_deref())?;
    let home = resolve_home(&state, &validated).await?;

    let queries = compile_analytics(&validated.filters, &validated.enabled, &unpaged_options(home));
    let data = state
        .storage
        .run_analytics(&queries)
        .await
        .inspect_err(|e| warn!(error = %e, "Failed to run analytics"))?;

    info!(
        statements = queries.statements.len(),
        applied = queries.applied_filters.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Analytics computed"
    );

    Ok(Json(AnalyticsResponse {
        ok: true,
        data,
        filter_transparency: queries.transparency(),
    }))
}

/// GET /api/v2/threats/severity-counts - Emitters per threat level.
#[instrument(skip(state, params))]
pub async fn get_severity_counts(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<SeverityCountsResponse>, ApiError> {
    let validated = validate_json(params.filters.as_deref(), params.enabled.as_deref())?;
    let home = resolve_home(&state, &validated).await?;

    let query = compile_severity_counts(&validated.filters, &validated.enabled, &unpaged_options(home));
    let counts = state
        .storage
        .fetch_severity_counts(&query)
        .await
        .inspect_err(|e| warn!(error = %e, "Failed to count threat severities"))?;

    info!(
        critical = counts.critical,
        high = counts.high,
        "Threat severity counts queried"
    );

    Ok(Json(SeverityCountsResponse {
        ok: true,
        counts,
        filter_transparency: query.transparency(),
    }))
}

/// GET /api/dashboard-metrics - Headline metrics and severity counts.
///
/// Severity counts degrade to zeros, listed in `errors`, when their
/// statement fails.
#[instrument(skip(state, params))]
pub async fn get_dashboard_metrics(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let validated = validate_json(params.filters.as_deref(), params.enabled.as_deref())?;
    let home = resolve_home(&state, &validated).await?;

    let response = load_dashboard(
        &state.storage,
        &validated.filters,
        &validated.enabled,
        &unpaged_options(home),
    )
    .await
    .inspect_err(|e| warn!(error = %e, "Failed to load dashboard metrics"))?;

    info!(
        networks = response.metrics.networks,
        observations = response.metrics.observations,
        error_count = response.errors.len(),
        "Dashboard metrics queried"
    );

    Ok(Json(response))
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
