//! Data models for emitterscope.
//!
//! Wire types use camelCase. Timestamps are stored as unix seconds and
//! surface as RFC 3339 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compiler::FilterTransparency;

/// Meters per degree of latitude, and of longitude at the equator.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Threat level assigned to emitters the scorer did not flag.
pub const THREAT_LEVEL_NONE: &str = "NONE";

/// The operator's home, stored as the most recent `home` location marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomeLocation {
    pub lat: f64,
    pub lon: f64,
}

impl HomeLocation {
    /// Meters per degree of longitude at this latitude.
    pub fn meters_per_degree_lon(&self) -> f64 {
        METERS_PER_DEGREE * self.lat.to_radians().cos()
    }

    /// Equirectangular distance in meters. Accurate to well under 1% at the
    /// distances a home filter deals with.
    pub fn distance_meters(&self, lat: f64, lon: f64) -> f64 {
        let dx = (lon - self.lon) * self.meters_per_degree_lon();
        let dy = (lat - self.lat) * METERS_PER_DEGREE;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Query parameters shared by all filtered endpoints.
///
/// `filters`, `enabled` and `bssids` carry JSON text; everything is kept as
/// a string so validation can report every malformed value at once.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    pub filters: Option<String>,
    pub enabled: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub bssids: Option<String>,
}

// ============================================================================
// Ingestion records
// ============================================================================

/// One emitter as last reported by a scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emitter {
    pub bssid: String,
    pub ssid: Option<String>,
    /// One of `W, E, B, L, N, G`.
    pub radio_type: Option<String>,
    /// MHz.
    pub frequency: Option<i64>,
    pub capabilities: Option<String>,
    pub manufacturer: Option<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// A single sighting of an emitter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub bssid: String,
    pub ssid: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// dBm.
    pub level: Option<i64>,
    /// GPS accuracy radius in meters.
    pub accuracy: Option<f64>,
    pub time: DateTime<Utc>,
    pub radio_type: Option<String>,
    pub radio_frequency: Option<i64>,
    pub radio_capabilities: Option<String>,
    pub altitude: Option<f64>,
}

/// A rule that fired for an emitter, as recorded by the scorer.
///
/// Older scorer versions write `rule`, newer ones `code`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatSignal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Value>,
}

impl ThreatSignal {
    pub fn name(&self) -> Option<&str> {
        self.code.as_deref().or(self.rule.as_deref())
    }
}

/// The external scorer's verdict for one emitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub score: f64,
    /// `CRITICAL`, `HIGH`, `MED`, `LOW` or `NONE`.
    pub level: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub signals: Vec<ThreatSignal>,
}

impl ThreatAssessment {
    /// Scorer levels are compared case-insensitively; a blank level is `NONE`.
    pub fn is_flagged(&self) -> bool {
        let level = self.level.trim();
        !(level.is_empty() || level.eq_ignore_ascii_case(THREAT_LEVEL_NONE))
    }
}

// ============================================================================
// Result rows
// ============================================================================

/// One evidence entry explaining a threat reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatEvidence {
    pub rule: String,
    pub observed_value: Option<Value>,
    pub threshold: Option<Value>,
}

/// One emitter in the list shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRow {
    pub bssid: String,
    pub ssid: String,
    #[serde(rename = "type")]
    pub radio_type: String,
    pub security: String,
    pub frequency: Option<i64>,
    pub channel: Option<i64>,
    pub capabilities: String,
    pub manufacturer: Option<String>,
    pub signal: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub accuracy: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub observations: i64,
    pub first_observed_at: Option<DateTime<Utc>>,
    pub last_observed_at: Option<DateTime<Utc>>,
    pub avg_signal: Option<f64>,
    pub min_signal: Option<i64>,
    pub max_signal: Option<i64>,
    pub stationary_confidence: Option<f64>,
    pub threat_score: Option<f64>,
    pub threat_level: String,
    pub threat_reasons: Vec<String>,
    pub threat_evidence: Vec<ThreatEvidence>,
    pub threat_transparency_error: bool,
    #[serde(skip)]
    pub assessment: Option<ThreatAssessment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// `[lon, lat]`.
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureProperties {
    pub id: i64,
    pub bssid: String,
    pub ssid: String,
    pub signal: Option<i64>,
    pub accuracy: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub radio_type: String,
    pub security: String,
    pub frequency: Option<i64>,
    pub threat_score: Option<f64>,
    pub threat_level: String,
    pub threat_reasons: Vec<String>,
    pub threat_evidence: Vec<ThreatEvidence>,
    pub threat_transparency_error: bool,
}

/// One located observation as a GeoJSON point feature.
#[derive(Debug, Clone, Serialize)]
pub struct GeoFeature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: PointGeometry,
    pub properties: FeatureProperties,
}

impl GeoFeature {
    pub fn point(lat: f64, lon: f64, properties: FeatureProperties) -> Self {
        Self {
            kind: "Feature",
            geometry: PointGeometry {
                kind: "Point",
                coordinates: [lon, lat],
            },
            properties,
        }
    }
}

/// One raw sighting in the observations shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRow {
    pub id: i64,
    pub bssid: String,
    pub ssid: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub signal: Option<i64>,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub radio_type: String,
    pub frequency: Option<i64>,
    pub capabilities: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketCount {
    pub bucket: i64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyLabelCount {
    pub day: String,
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatTrendPoint {
    pub day: String,
    pub avg_score: Option<f64>,
    pub flagged: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopNetwork {
    pub bssid: String,
    pub ssid: String,
    pub observations: i64,
    pub threat_score: Option<f64>,
    pub threat_level: String,
}

/// Result of the analytics bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsBundle {
    pub network_types: Vec<LabelCount>,
    pub signal_strength: Vec<BucketCount>,
    pub security: Vec<LabelCount>,
    pub threat_distribution: Vec<LabelCount>,
    pub hourly_activity: Vec<BucketCount>,
    pub radio_types_over_time: Vec<DailyLabelCount>,
    pub threat_trends: Vec<ThreatTrendPoint>,
    pub top_networks: Vec<TopNetwork>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioBreakdown {
    pub wifi: i64,
    pub ble: i64,
    pub bluetooth: i64,
    pub lte: i64,
    pub nr: i64,
    pub gsm: i64,
    pub unknown: i64,
}

/// Headline numbers for the dashboard tiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub networks: i64,
    pub observations: i64,
    pub by_radio: RadioBreakdown,
}

/// Emitters per threat level. All zeros when unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub none: i64,
}

// ============================================================================
// Response envelopes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub limit: u32,
    pub offset: u64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(total: i64, limit: u32, offset: u64) -> Self {
        let next = offset.saturating_add(u64::from(limit));
        Self {
            total,
            limit,
            offset,
            has_more: u64::try_from(total).map(|total| next < total).unwrap_or(false),
        }
    }
}

/// Threat rows in a page whose level has no stated reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatValidation {
    pub threats_without_reasons: usize,
    pub total_threats: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkListResponse {
    pub ok: bool,
    pub data: Vec<NetworkRow>,
    pub pagination: Pagination,
    pub filter_transparency: FilterTransparency,
    pub threat_validation: ThreatValidation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub ok: bool,
    pub total: i64,
    pub filter_transparency: FilterTransparency,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeospatialResponse {
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<GeoFeature>,
    /// More located observations matched than `limit`.
    pub truncated: bool,
    pub limit: u32,
    pub filter_transparency: FilterTransparency,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationsResponse {
    pub ok: bool,
    pub rows: Vec<ObservationRow>,
    pub pagination: Pagination,
    pub filter_transparency: FilterTransparency,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub ok: bool,
    pub data: AnalyticsBundle,
    pub filter_transparency: FilterTransparency,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityCountsResponse {
    pub ok: bool,
    pub counts: SeverityCounts,
    pub filter_transparency: FilterTransparency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_has_more() {
        assert!(Pagination::new(10, 5, 0).has_more);
        assert!(!Pagination::new(10, 5, 5).has_more);
        assert!(!Pagination::new(0, 500, 0).has_more);
        assert!(!Pagination::new(3, 500, 1000).has_more);
    }

    #[test]
    fn test_distance_is_roughly_haversine() {
        let home = HomeLocation { lat: 51.5, lon: -0.12 };
        // ~1 km north
        let north = home.distance_meters(51.5 + 1000.0 / METERS_PER_DEGREE, -0.12);
        assert!((north - 1000.0).abs() < 1.0);
        // ~1 km east at this latitude
        let east = home.distance_meters(51.5, -0.12 + 1000.0 / home.meters_per_degree_lon());
        assert!((east - 1000.0).abs() < 1.0);
    }

    #[test]
    fn test_signal_name_prefers_code() {
        let signal = ThreatSignal {
            code: Some("SPEED_PATTERN".into()),
            rule: Some("legacy".into()),
            evidence: None,
        };
        assert_eq!(signal.name(), Some("SPEED_PATTERN"));
        let legacy = ThreatSignal {
            rule: Some("HOME_AND_AWAY".into()),
            ..ThreatSignal::default()
        };
        assert_eq!(legacy.name(), Some("HOME_AND_AWAY"));
    }

    #[test]
    fn test_threat_level_is_case_insensitive() {
        let assessment = |level: &str| ThreatAssessment {
            score: 10.0,
            level: level.into(),
            flags: vec![],
            signals: vec![],
        };
        assert!(!assessment("none").is_flagged());
        assert!(!assessment(" None ").is_flagged());
        assert!(!assessment("").is_flagged());
        assert!(assessment("high").is_flagged());
        assert!(assessment("CRITICAL").is_flagged());
    }

    #[test]
    fn test_geo_feature_coordinates_are_lon_lat() {
        let feature = GeoFeature::point(
            10.0,
            20.0,
            FeatureProperties {
                id: 1,
                bssid: "AA:BB:CC:DD:EE:FF".into(),
                ssid: String::new(),
                signal: None,
                accuracy: None,
                observed_at: None,
                radio_type: "W".into(),
                security: "OPEN".into(),
                frequency: None,
                threat_score: None,
                threat_level: "NONE".into(),
                threat_reasons: Vec::new(),
                threat_evidence: Vec::new(),
                threat_transparency_error: false,
            },
        );
        let json = serde_json::to_value(&feature).unwrap();
        assert_eq!(json["geometry"]["coordinates"], serde_json::json!([20.0, 10.0]));
        assert_eq!(json["type"], "Feature");
    }
}
