//! Dashboard tiles: headline metrics plus threat severity counts.
//!
//! Both statements are compiled from the same filter state and run
//! concurrently. Metrics are required; severity counts are decoration and
//! degrade to zeros, with the failure listed in `errors`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compiler::{
    CompileOptions, FilterTransparency, compile_dashboard_metrics, compile_severity_counts,
};
use crate::filters::{EnabledSet, FilterSpec};
use crate::model::{DashboardMetrics, SeverityCounts};
use crate::storage::{Storage, StorageError};

/// Which half of the dashboard failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardSource {
    Metrics,
    SeverityCounts,
}

/// Error from one dashboard source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub source: DashboardSource,
    pub message: String,
}

/// Dashboard API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub ok: bool,

    /// When this response was generated.
    pub timestamp: DateTime<Utc>,

    pub metrics: DashboardMetrics,

    /// Zeros when the severity statement failed.
    pub threat_severity: SeverityCounts,

    /// Errors encountered while fetching non-essential sources.
    #[serde(default)]
    pub errors: Vec<SourceError>,

    pub filter_transparency: FilterTransparency,
}

/// Compile and run both dashboard statements concurrently.
pub async fn load_dashboard(
    storage: &Storage,
    filters: &FilterSpec,
    enabled: &EnabledSet,
    options: &CompileOptions,
) -> Result<DashboardResponse, StorageError> {
    let metrics_query = compile_dashboard_metrics(filters, enabled, options);
    let severity_query = compile_severity_counts(filters, enabled, options);

    let (metrics_result, severity_result) = tokio::join!(
        storage.fetch_dashboard_metrics(&metrics_query),
        storage.fetch_severity_counts(&severity_query),
    );

    assemble(metrics_result, severity_result, metrics_query.transparency())
}

fn assemble(
    metrics: Result<DashboardMetrics, StorageError>,
    severity: Result<SeverityCounts, StorageError>,
    filter_transparency: FilterTransparency,
) -> Result<DashboardResponse, StorageError> {
    let metrics = metrics?;
    let mut errors = Vec::new();

    let threat_severity = match severity {
        Ok(counts) => counts,
        Err(e) => {
            warn!(error = %e, "Severity counts unavailable, reporting zeros");
            errors.push(SourceError {
                source: DashboardSource::SeverityCounts,
                message: e.to_string(),
            });
            SeverityCounts::default()
        }
    };

    Ok(DashboardResponse {
        ok: true,
        timestamp: Utc::now(),
        metrics,
        threat_severity,
        errors,
        filter_transparency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> DashboardMetrics {
        DashboardMetrics {
            networks: 12,
            observations: 340,
            ..DashboardMetrics::default()
        }
    }

    #[test]
    fn test_severity_failure_degrades_to_zeros() {
        let response = assemble(
            Ok(metrics()),
            Err(StorageError::Database(sqlx::Error::PoolTimedOut)),
            FilterTransparency::default(),
        )
        .unwrap();

        assert_eq!(response.metrics.networks, 12);
        assert_eq!(response.threat_severity, SeverityCounts::default());
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].source, DashboardSource::SeverityCounts);
    }

    #[test]
    fn test_metrics_failure_is_an_error() {
        let result = assemble(
            Err(StorageError::Database(sqlx::Error::PoolTimedOut)),
            Ok(SeverityCounts::default()),
            FilterTransparency::default(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_dashboard_on_empty_database() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let response = load_dashboard(
            &storage,
            &FilterSpec::new(),
            &EnabledSet::new(),
            &CompileOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(response.metrics, DashboardMetrics::default());
        assert_eq!(response.threat_severity, SeverityCounts::default());
        assert!(response.errors.is_empty());
    }
}
