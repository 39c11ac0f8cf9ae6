//! HTTP client used by one dashboard surface.
//!
//! Each request first reduces the canonical filter state to what the surface
//! supports, then waits out a short debounce before hitting the server. A
//! newer request from the same client aborts the older one, and a generation
//! counter drops any completion that was overtaken anyway, so callers only
//! ever see the latest answer.
//!
//! # Example
//!
//! ```ignore
//! let client = SurfaceClient::new("http://localhost:3000", Surface::Dashboard);
//! let page = client.fetch_networks(&filters, &enabled, &PageRequest::default()).await?;
//! for key in &page.ignored_keys {
//!     println!("not applied on this page: {key}");
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::capability::{AdaptedFilters, CapabilityDeclaration, Surface, adapt};
use crate::compiler::FilterTransparency;
use crate::dashboard::DashboardResponse;
use crate::filters::{EnabledSet, FilterKey, FilterSpec};
use crate::model::{DashboardMetrics, Pagination, SeverityCounts};

/// Quiet period before a request is sent.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

const NETWORKS_PATH: &str = "/api/v2/networks/filtered";
const GEOSPATIAL_PATH: &str = "/api/v2/networks/filtered/geospatial";
const OBSERVATIONS_PATH: &str = "/api/v2/networks/filtered/observations";
const ANALYTICS_PATH: &str = "/api/v2/networks/filtered/analytics";
const SEVERITY_PATH: &str = "/api/v2/threats/severity-counts";
const DASHBOARD_METRICS_PATH: &str = "/api/dashboard-metrics";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A newer request from the same surface replaced this one.
    #[error("request superseded by a newer one")]
    Superseded,

    #[error("server rejected request with status {status}")]
    Rejected { status: u16, body: Value },

    #[error("failed to encode {0}: {1}")]
    Encode(&'static str, serde_json::Error),

    #[error("request task failed: {0}")]
    Task(String),
}

/// Pagination, sort and selection for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<u32>,
    pub offset: Option<u64>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub bssids: Vec<String>,
}

/// A server response plus the keys this surface could not apply.
#[derive(Debug, Clone)]
pub struct SurfaceResponse<T> {
    pub body: T,
    pub ignored_keys: Vec<FilterKey>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub data: Vec<Value>,
    pub pagination: Pagination,
    pub filter_transparency: FilterTransparency,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCollection {
    pub features: Vec<Value>,
    pub truncated: bool,
    pub limit: u32,
    pub filter_transparency: FilterTransparency,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationPage {
    pub rows: Vec<Value>,
    pub pagination: Pagination,
    pub filter_transparency: FilterTransparency,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsPage {
    pub data: Value,
    pub filter_transparency: FilterTransparency,
}

#[derive(Debug, Deserialize)]
struct SeverityEnvelope {
    counts: SeverityCounts,
}

/// Dashboard tiles as shown to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardTiles {
    pub metrics: DashboardMetrics,
    /// Zeros when the severity request failed.
    pub severity: SeverityCounts,
    pub severity_error: Option<String>,
}

/// Client for one surface.
pub struct SurfaceClient {
    http: reqwest::Client,
    base_url: String,
    surface: Surface,
    capability: CapabilityDeclaration,
    debounce: Duration,
    in_flight: Mutex<Option<AbortHandle>>,
    generation: AtomicU64,
    last_adapted: Mutex<Option<AdaptationMemo>>,
}

/// The last adapted state, reused while the canonical state is unchanged.
struct AdaptationMemo {
    filters: FilterSpec,
    enabled: EnabledSet,
    adapted: AdaptedFilters,
}

impl SurfaceClient {
    pub fn new(base_url: &str, surface: Surface) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            surface,
            capability: surface.capabilities(),
            debounce: DEFAULT_DEBOUNCE,
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
            last_adapted: Mutex::new(None),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    /// The filter state this surface will actually send.
    pub fn adapt(&self, filters: &FilterSpec, enabled: &EnabledSet) -> AdaptedFilters {
        let mut memo = self
            .last_adapted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(memo) = memo.as_ref() {
            if memo.filters == *filters && memo.enabled == *enabled {
                return memo.adapted.clone();
            }
        }

        let adapted = adapt(filters, enabled, &self.capability);
        *memo = Some(AdaptationMemo {
            filters: filters.clone(),
            enabled: enabled.clone(),
            adapted: adapted.clone(),
        });
        adapted
    }

    pub async fn fetch_networks(
        &self,
        filters: &FilterSpec,
        enabled: &EnabledSet,
        page: &PageRequest,
    ) -> Result<SurfaceResponse<ListPage>, ClientError> {
        self.fetch(NETWORKS_PATH, filters, enabled, page).await
    }

    pub async fn fetch_geospatial(
        &self,
        filters: &FilterSpec,
        enabled: &EnabledSet,
        page: &PageRequest,
    ) -> Result<SurfaceResponse<FeatureCollection>, ClientError> {
        self.fetch(GEOSPATIAL_PATH, filters, enabled, page).await
    }

    pub async fn fetch_observations(
        &self,
        filters: &FilterSpec,
        enabled: &EnabledSet,
        page: &PageRequest,
    ) -> Result<SurfaceResponse<ObservationPage>, ClientError> {
        self.fetch(OBSERVATIONS_PATH, filters, enabled, page).await
    }

    pub async fn fetch_analytics(
        &self,
        filters: &FilterSpec,
        enabled: &EnabledSet,
    ) -> Result<SurfaceResponse<AnalyticsPage>, ClientError> {
        self.fetch(ANALYTICS_PATH, filters, enabled, &PageRequest::default())
            .await
    }

    /// Fetch metrics and severity counts concurrently. A failed severity
    /// request shows zeros instead of failing the tiles.
    pub async fn fetch_dashboard(
        &self,
        filters: &FilterSpec,
        enabled: &EnabledSet,
    ) -> Result<SurfaceResponse<DashboardTiles>, ClientError> {
        let adapted = self.adapt(filters, enabled);
        let query = query_string(&adapted, &PageRequest::default())?;
        let metrics_url = format!("{}{}?{}", self.base_url, DASHBOARD_METRICS_PATH, query);
        let severity_url = format!("{}{}?{}", self.base_url, SEVERITY_PATH, query);
        let http = self.http.clone();

        let tiles = self
            .run_latest(async move {
                let (metrics, severity) = tokio::join!(
                    get_json::<DashboardResponse>(&http, &metrics_url),
                    get_json::<SeverityEnvelope>(&http, &severity_url),
                );

                let metrics = metrics?.metrics;
                let (severity, severity_error) = match severity {
                    Ok(envelope) => (envelope.counts, None),
                    Err(e) => {
                        warn!(error = %e, "Severity counts unavailable, showing zeros");
                        (SeverityCounts::default(), Some(e.to_string()))
                    }
                };

                Ok(DashboardTiles {
                    metrics,
                    severity,
                    severity_error,
                })
            })
            .await?;

        Ok(SurfaceResponse {
            body: tiles,
            ignored_keys: adapted.ignored_keys,
        })
    }

    async fn fetch<T>(
        &self,
        path: &str,
        filters: &FilterSpec,
        enabled: &EnabledSet,
        page: &PageRequest,
    ) -> Result<SurfaceResponse<T>, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let adapted = self.adapt(filters, enabled);
        let url = format!("{}{}?{}", self.base_url, path, query_string(&adapted, page)?);
        let http = self.http.clone();

        let body = self
            .run_latest(async move { get_json::<T>(&http, &url).await })
            .await?;

        Ok(SurfaceResponse {
            body,
            ignored_keys: adapted.ignored_keys,
        })
    }

    /// Run `request` after the debounce, aborting whatever this client had
    /// in flight. Overtaken results come back as `Superseded`.
    async fn run_latest<T, F>(&self, request: F) -> Result<T, ClientError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let debounce = self.debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            request.await
        });

        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task.abort_handle());
        if let Some(previous) = previous {
            debug!(surface = self.surface.as_str(), generation, "Superseding in-flight request");
            previous.abort();
        }

        let outcome = task.await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(ClientError::Superseded);
        }
        match outcome {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ClientError::Superseded),
            Err(e) => Err(ClientError::Task(e.to_string())),
        }
    }
}

async fn get_json<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> Result<T, ClientError> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        return Err(ClientError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<T>().await?)
}

/// Encode the adapted state and page parameters as a query string.
fn query_string(adapted: &AdaptedFilters, page: &PageRequest) -> Result<String, ClientError> {
    let filters = serde_json::to_string(&adapted.filters_for_page)
        .map_err(|e| ClientError::Encode("filters", e))?;
    let enabled = serde_json::to_string(&adapted.enabled_for_page)
        .map_err(|e| ClientError::Encode("enabled", e))?;

    let mut pairs = vec![("filters", filters), ("enabled", enabled)];
    if let Some(limit) = page.limit {
        pairs.push(("limit", limit.to_string()));
    }
    if let Some(offset) = page.offset {
        pairs.push(("offset", offset.to_string()));
    }
    if let Some(sort) = &page.sort {
        pairs.push(("sort", sort.clone()));
    }
    if let Some(order) = &page.order {
        pairs.push(("order", order.clone()));
    }
    if !page.bssids.is_empty() {
        let bssids =
            serde_json::to_string(&page.bssids).map_err(|e| ClientError::Encode("bssids", e))?;
        pairs.push(("bssids", bssids));
    }

    Ok(pairs
        .iter()
        .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&"))
}
