//! Canonical filter vocabulary shared by the capability adapter and the
//! filter compiler.
//!
//! # Values versus switches
//!
//! A [`FilterSpec`] holds the values an operator has typed or picked, an
//! [`EnabledSet`] decides which of them are in force. A filter affects a
//! query if and only if its [`EnabledSet`] entry is `true`; a value sitting
//! in the [`FilterSpec`] for a disabled key is inert.
//!
//! Both sides of the request boundary use these types, so "filter X is on"
//! means the same thing in the browser surface and in the compiled SQL.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the filter vocabulary. Bumped whenever a key is added,
/// removed or changes its value type.
pub const FILTER_VOCABULARY_VERSION: u32 = 1;

/// Weakest signal level still considered a real reading (dBm).
pub const NOISE_FLOOR_DBM: f64 = -95.0;

/// Largest GPS accuracy radius a filter may ask for (meters).
pub const MAX_GPS_ACCURACY_METERS: f64 = 1000.0;

/// Radio classes: Wi-Fi, BLE, classic Bluetooth, LTE, 5G NR, GSM, unknown.
pub const RADIO_TYPES: &[&str] = &["W", "E", "B", "L", "N", "G", "?"];
pub const FREQUENCY_BANDS: &[&str] = &["2.4GHz", "5GHz", "6GHz", "BLE", "Cellular"];
pub const ENCRYPTION_TYPES: &[&str] = &["OPEN", "WEP", "WPA", "WPA2", "WPA3"];
pub const AUTH_METHODS: &[&str] = &["PSK", "Enterprise", "SAE", "OWE", "None"];
pub const INSECURE_FLAGS: &[&str] = &["open", "wep", "wps", "deprecated"];
pub const SECURITY_FLAGS: &[&str] = &["insecure", "deprecated", "enterprise", "personal", "unknown"];
pub const THREAT_CATEGORIES: &[&str] = &["critical", "high", "medium", "low"];
pub const TEMPORAL_SCOPES: &[&str] = &["observation_time", "network_lifetime", "threat_window"];
pub const QUALITY_FILTERS: &[&str] = &["none", "temporal", "extreme", "duplicate", "all"];

/// One named, typed dimension of the filter vocabulary.
///
/// Declaration order is the vocabulary order: the compiler walks keys in
/// this order, which keeps parameter numbering stable for identical payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKey {
    Ssid,
    Bssid,
    Manufacturer,
    NetworkId,
    RadioTypes,
    FrequencyBands,
    ChannelMin,
    ChannelMax,
    RssiMin,
    RssiMax,
    EncryptionTypes,
    AuthMethods,
    InsecureFlags,
    SecurityFlags,
    Timeframe,
    TemporalScope,
    ObservationCountMin,
    ObservationCountMax,
    GpsAccuracyMax,
    ExcludeInvalidCoords,
    QualityFilter,
    DistanceFromHomeMin,
    DistanceFromHomeMax,
    BoundingBox,
    RadiusFilter,
    ThreatScoreMin,
    ThreatScoreMax,
    ThreatCategories,
    StationaryConfidenceMin,
    StationaryConfidenceMax,
}

/// The shape a key's value must have.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// Free text.
    Text,
    /// Exactly one word from the vocabulary.
    Choice(&'static [&'static str]),
    /// A non-empty set of words from the vocabulary.
    Set(&'static [&'static str]),
    /// A finite number within inclusive bounds.
    Number { min: f64, max: f64, integral: bool },
    /// A boolean switch.
    Flag,
    Timeframe,
    BoundingBox,
    Radius,
}

impl FilterKey {
    /// Every key, in vocabulary order.
    pub const ALL: [FilterKey; 30] = [
        FilterKey::Ssid,
        FilterKey::Bssid,
        FilterKey::Manufacturer,
        FilterKey::NetworkId,
        FilterKey::RadioTypes,
        FilterKey::FrequencyBands,
        FilterKey::ChannelMin,
        FilterKey::ChannelMax,
        FilterKey::RssiMin,
        FilterKey::RssiMax,
        FilterKey::EncryptionTypes,
        FilterKey::AuthMethods,
        FilterKey::InsecureFlags,
        FilterKey::SecurityFlags,
        FilterKey::Timeframe,
        FilterKey::TemporalScope,
        FilterKey::ObservationCountMin,
        FilterKey::ObservationCountMax,
        FilterKey::GpsAccuracyMax,
        FilterKey::ExcludeInvalidCoords,
        FilterKey::QualityFilter,
        FilterKey::DistanceFromHomeMin,
        FilterKey::DistanceFromHomeMax,
        FilterKey::BoundingBox,
        FilterKey::RadiusFilter,
        FilterKey::ThreatScoreMin,
        FilterKey::ThreatScoreMax,
        FilterKey::ThreatCategories,
        FilterKey::StationaryConfidenceMin,
        FilterKey::StationaryConfidenceMax,
    ];

    /// Wire name of the key.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKey::Ssid => "ssid",
            FilterKey::Bssid => "bssid",
            FilterKey::Manufacturer => "manufacturer",
            FilterKey::NetworkId => "networkId",
            FilterKey::RadioTypes => "radioTypes",
            FilterKey::FrequencyBands => "frequencyBands",
            FilterKey::ChannelMin => "channelMin",
            FilterKey::ChannelMax => "channelMax",
            FilterKey::RssiMin => "rssiMin",
            FilterKey::RssiMax => "rssiMax",
            FilterKey::EncryptionTypes => "encryptionTypes",
            FilterKey::AuthMethods => "authMethods",
            FilterKey::InsecureFlags => "insecureFlags",
            FilterKey::SecurityFlags => "securityFlags",
            FilterKey::Timeframe => "timeframe",
            FilterKey::TemporalScope => "temporalScope",
            FilterKey::ObservationCountMin => "observationCountMin",
            FilterKey::ObservationCountMax => "observationCountMax",
            FilterKey::GpsAccuracyMax => "gpsAccuracyMax",
            FilterKey::ExcludeInvalidCoords => "excludeInvalidCoords",
            FilterKey::QualityFilter => "qualityFilter",
            FilterKey::DistanceFromHomeMin => "distanceFromHomeMin",
            FilterKey::DistanceFromHomeMax => "distanceFromHomeMax",
            FilterKey::BoundingBox => "boundingBox",
            FilterKey::RadiusFilter => "radiusFilter",
            FilterKey::ThreatScoreMin => "threatScoreMin",
            FilterKey::ThreatScoreMax => "threatScoreMax",
            FilterKey::ThreatCategories => "threatCategories",
            FilterKey::StationaryConfidenceMin => "stationaryConfidenceMin",
            FilterKey::StationaryConfidenceMax => "stationaryConfidenceMax",
        }
    }

    /// The value type this key accepts.
    pub fn kind(&self) -> ValueKind {
        match self {
            FilterKey::Ssid | FilterKey::Bssid | FilterKey::Manufacturer | FilterKey::NetworkId => {
                ValueKind::Text
            }
            FilterKey::RadioTypes => ValueKind::Set(RADIO_TYPES),
            FilterKey::FrequencyBands => ValueKind::Set(FREQUENCY_BANDS),
            FilterKey::EncryptionTypes => ValueKind::Set(ENCRYPTION_TYPES),
            FilterKey::AuthMethods => ValueKind::Set(AUTH_METHODS),
            FilterKey::InsecureFlags => ValueKind::Set(INSECURE_FLAGS),
            FilterKey::SecurityFlags => ValueKind::Set(SECURITY_FLAGS),
            FilterKey::ThreatCategories => ValueKind::Set(THREAT_CATEGORIES),
            FilterKey::TemporalScope => ValueKind::Choice(TEMPORAL_SCOPES),
            FilterKey::QualityFilter => ValueKind::Choice(QUALITY_FILTERS),
            FilterKey::ChannelMin | FilterKey::ChannelMax => ValueKind::Number {
                min: 0.0,
                max: 233.0,
                integral: true,
            },
            FilterKey::RssiMin | FilterKey::RssiMax => ValueKind::Number {
                min: NOISE_FLOOR_DBM,
                max: 0.0,
                integral: true,
            },
            FilterKey::ObservationCountMin | FilterKey::ObservationCountMax => ValueKind::Number {
                min: 0.0,
                max: f64::MAX,
                integral: true,
            },
            FilterKey::GpsAccuracyMax => ValueKind::Number {
                min: 0.0,
                max: MAX_GPS_ACCURACY_METERS,
                integral: false,
            },
            FilterKey::DistanceFromHomeMin | FilterKey::DistanceFromHomeMax => ValueKind::Number {
                min: 0.0,
                max: f64::MAX,
                integral: false,
            },
            FilterKey::ThreatScoreMin | FilterKey::ThreatScoreMax => ValueKind::Number {
                min: 0.0,
                max: 100.0,
                integral: false,
            },
            FilterKey::StationaryConfidenceMin | FilterKey::StationaryConfidenceMax => {
                ValueKind::Number {
                    min: 0.0,
                    max: 1.0,
                    integral: false,
                }
            }
            FilterKey::ExcludeInvalidCoords => ValueKind::Flag,
            FilterKey::Timeframe => ValueKind::Timeframe,
            FilterKey::BoundingBox => ValueKind::BoundingBox,
            FilterKey::RadiusFilter => ValueKind::Radius,
        }
    }

    /// Keys describing an aggregate emitter rather than a single sighting.
    ///
    /// These are force-disabled for per-observation row shapes.
    pub fn is_emitter_level(&self) -> bool {
        matches!(
            self,
            FilterKey::ThreatScoreMin
                | FilterKey::ThreatScoreMax
                | FilterKey::ThreatCategories
                | FilterKey::StationaryConfidenceMin
                | FilterKey::StationaryConfidenceMax
                | FilterKey::ObservationCountMin
                | FilterKey::ObservationCountMax
                | FilterKey::DistanceFromHomeMin
                | FilterKey::DistanceFromHomeMax
        )
    }

    /// For a `*Max` key, the matching `*Min` key.
    pub fn range_floor(&self) -> Option<FilterKey> {
        match self {
            FilterKey::ChannelMax => Some(FilterKey::ChannelMin),
            FilterKey::RssiMax => Some(FilterKey::RssiMin),
            FilterKey::ObservationCountMax => Some(FilterKey::ObservationCountMin),
            FilterKey::DistanceFromHomeMax => Some(FilterKey::DistanceFromHomeMin),
            FilterKey::ThreatScoreMax => Some(FilterKey::ThreatScoreMin),
            FilterKey::StationaryConfidenceMax => Some(FilterKey::StationaryConfidenceMin),
            _ => None,
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key outside the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown filter key '{0}'")]
pub struct UnknownFilterKey(pub String);

impl FromStr for FilterKey {
    type Err = UnknownFilterKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownFilterKey(s.to_string()))
    }
}

/// Unit of a relative time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUnit {
    Hours,
    Days,
    Weeks,
    /// 30 days.
    Months,
    /// 365 days.
    Years,
}

impl WindowUnit {
    fn suffix(&self) -> char {
        match self {
            WindowUnit::Hours => 'h',
            WindowUnit::Days => 'd',
            WindowUnit::Weeks => 'w',
            WindowUnit::Months => 'm',
            WindowUnit::Years => 'y',
        }
    }

    fn hours(&self) -> i64 {
        match self {
            WindowUnit::Hours => 1,
            WindowUnit::Days => 24,
            WindowUnit::Weeks => 24 * 7,
            WindowUnit::Months => 24 * 30,
            WindowUnit::Years => 24 * 365,
        }
    }
}

/// Largest amount accepted in a relative window token.
const MAX_WINDOW_AMOUNT: u32 = 10_000;

/// A relative window such as `24h`, `7d` or `1y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativeWindow {
    pub amount: u32,
    pub unit: WindowUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("relative window must look like <integer><unit> with unit h, d, w, m or y, got '{0}'")]
pub struct InvalidWindow(pub String);

impl RelativeWindow {
    pub fn duration(&self) -> Duration {
        Duration::hours(i64::from(self.amount) * self.unit.hours())
    }

    /// Earliest instant inside the window ending at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

impl FromStr for RelativeWindow {
    type Err = InvalidWindow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidWindow(s.to_string());
        let trimmed = s.trim();
        let unit_char = trimmed.chars().last().ok_or_else(invalid)?;
        let unit = match unit_char {
            'h' => WindowUnit::Hours,
            'd' => WindowUnit::Days,
            'w' => WindowUnit::Weeks,
            'm' => WindowUnit::Months,
            'y' => WindowUnit::Years,
            _ => return Err(invalid()),
        };
        let digits = &trimmed[..trimmed.len() - 1];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount: u32 = digits.parse().map_err(|_| invalid())?;
        if amount == 0 || amount > MAX_WINDOW_AMOUNT {
            return Err(invalid());
        }
        Ok(RelativeWindow { amount, unit })
    }
}

impl TryFrom<String> for RelativeWindow {
    type Error = InvalidWindow;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for RelativeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

impl From<RelativeWindow> for String {
    fn from(window: RelativeWindow) -> Self {
        window.to_string()
    }
}

/// Time constraint of the `timeframe` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Timeframe {
    Relative {
        #[serde(rename = "relativeWindow")]
        window: RelativeWindow,
    },
    Absolute {
        #[serde(rename = "startTimestamp")]
        start: DateTime<Utc>,
        #[serde(rename = "endTimestamp")]
        end: DateTime<Utc>,
    },
}

/// Rectangular map area. Accepts `south/north/west/east` as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    #[serde(alias = "south")]
    pub min_lat: f64,
    #[serde(alias = "north")]
    pub max_lat: f64,
    #[serde(alias = "west")]
    pub min_lng: f64,
    #[serde(alias = "east")]
    pub max_lng: f64,
}

/// Circle around a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadiusFilter {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
}

/// A typed filter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Set(Vec<String>),
    Timeframe(Timeframe),
    BoundingBox(BoundingBox),
    Radius(RadiusFilter),
}

impl FilterValue {
    pub fn text(value: impl Into<String>) -> Self {
        FilterValue::Text(value.into())
    }

    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::Set(items.into_iter().map(Into::into).collect())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Number(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Flag(value)
    }
}

/// Filter values keyed by [`FilterKey`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec(BTreeMap<FilterKey, FilterValue>);

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: FilterKey, value: impl Into<FilterValue>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    pub fn insert(&mut self, key: FilterKey, value: FilterValue) {
        self.0.insert(key, value);
    }

    pub fn remove(&mut self, key: FilterKey) -> Option<FilterValue> {
        self.0.remove(&key)
    }

    pub fn get(&self, key: FilterKey) -> Option<&FilterValue> {
        self.0.get(&key)
    }

    pub fn contains(&self, key: FilterKey) -> bool {
        self.0.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FilterKey, &FilterValue)> {
        self.0.iter().map(|(key, value)| (*key, value))
    }

    /// Non-empty text value (whitespace-only counts as empty).
    pub fn text(&self, key: FilterKey) -> Option<&str> {
        match self.0.get(&key) {
            Some(FilterValue::Text(text)) if !text.trim().is_empty() => Some(text.trim()),
            _ => None,
        }
    }

    pub fn number(&self, key: FilterKey) -> Option<f64> {
        match self.0.get(&key) {
            Some(FilterValue::Number(n)) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    /// Non-empty set value.
    pub fn set(&self, key: FilterKey) -> Option<&[String]> {
        match self.0.get(&key) {
            Some(FilterValue::Set(items)) if !items.is_empty() => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn flag(&self, key: FilterKey) -> Option<bool> {
        match self.0.get(&key) {
            Some(FilterValue::Flag(flag)) => Some(*flag),
            _ => None,
        }
    }

    pub fn timeframe(&self) -> Option<&Timeframe> {
        match self.0.get(&FilterKey::Timeframe) {
            Some(FilterValue::Timeframe(timeframe)) => Some(timeframe),
            _ => None,
        }
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        match self.0.get(&FilterKey::BoundingBox) {
            Some(FilterValue::BoundingBox(bbox)) => Some(bbox),
            _ => None,
        }
    }

    pub fn radius(&self) -> Option<&RadiusFilter> {
        match self.0.get(&FilterKey::RadiusFilter) {
            Some(FilterValue::Radius(radius)) => Some(radius),
            _ => None,
        }
    }
}

impl FromIterator<(FilterKey, FilterValue)> for FilterSpec {
    fn from_iter<T: IntoIterator<Item = (FilterKey, FilterValue)>>(iter: T) -> Self {
        FilterSpec(iter.into_iter().collect())
    }
}

/// Which filters are in force.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnabledSet(BTreeMap<FilterKey, bool>);

impl EnabledSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style switch-on.
    pub fn enable(mut self, key: FilterKey) -> Self {
        self.0.insert(key, true);
        self
    }

    /// Builder-style switch-off that keeps the key listed.
    pub fn disable(mut self, key: FilterKey) -> Self {
        self.0.insert(key, false);
        self
    }

    pub fn set(&mut self, key: FilterKey, enabled: bool) {
        self.0.insert(key, enabled);
    }

    pub fn is_enabled(&self, key: FilterKey) -> bool {
        self.0.get(&key).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FilterKey, bool)> + '_ {
        self.0.iter().map(|(key, enabled)| (*key, *enabled))
    }

    /// Enabled keys in vocabulary order.
    pub fn enabled_keys(&self) -> impl Iterator<Item = FilterKey> + '_ {
        self.iter().filter(|(_, on)| *on).map(|(key, _)| key)
    }

    pub fn count_enabled(&self) -> usize {
        self.enabled_keys().count()
    }

    /// Whether a distance-from-home filter is switched on.
    pub fn requires_home(&self) -> bool {
        self.is_enabled(FilterKey::DistanceFromHomeMin)
            || self.is_enabled(FilterKey::DistanceFromHomeMax)
    }
}

impl FromIterator<(FilterKey, bool)> for EnabledSet {
    fn from_iter<T: IntoIterator<Item = (FilterKey, bool)>>(iter: T) -> Self {
        EnabledSet(iter.into_iter().collect())
    }
}

/// A saved filter state: values and switches together, exactly as they were.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterPreset {
    #[serde(default)]
    pub filters: FilterSpec,
    #[serde(default)]
    pub enabled: EnabledSet,
}

impl FilterPreset {
    pub fn new(filters: FilterSpec, enabled: EnabledSet) -> Self {
        Self { filters, enabled }
    }

    pub fn into_parts(self) -> (FilterSpec, EnabledSet) {
        (self.filters, self.enabled)
    }
}

/// Named presets, serialized as a plain `{name: preset}` object.
///
/// Saving under an existing name replaces it. Loading hands back disabled
/// values too, so a preset restores inert values without switching them on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetRegistry(BTreeMap<String, FilterPreset>);

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, name: impl Into<String>, filters: &FilterSpec, enabled: &EnabledSet) {
        self.0
            .insert(name.into(), FilterPreset::new(filters.clone(), enabled.clone()));
    }

    /// `None` for an unknown name; the caller keeps its current state.
    pub fn load(&self, name: &str) -> Option<FilterPreset> {
        self.0.get(name).cloned()
    }

    pub fn delete(&mut self, name: &str) -> Option<FilterPreset> {
        self.0.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_names_round_trip_through_from_str() {
        for key in FilterKey::ALL {
            assert_eq!(key.as_str().parse::<FilterKey>().unwrap(), key);
        }
        assert!("rssi_min".parse::<FilterKey>().is_err());
    }

    #[test]
    fn test_serde_names_match_wire_names() {
        for key in FilterKey::ALL {
            let encoded = serde_json::to_value(key).unwrap();
            assert_eq!(encoded, json!(key.as_str()));
        }
    }

    #[test]
    fn test_relative_window_parsing() {
        let window: RelativeWindow = "30d".parse().unwrap();
        assert_eq!(window.amount, 30);
        assert_eq!(window.unit, WindowUnit::Days);
        assert_eq!(window.duration(), Duration::days(30));
        assert_eq!("2m".parse::<RelativeWindow>().unwrap().duration(), Duration::days(60));
        assert_eq!("1y".parse::<RelativeWindow>().unwrap().duration(), Duration::days(365));

        for bad in ["", "d", "30", "0d", "-3d", "3.5h", "12x", "all"] {
            assert!(bad.parse::<RelativeWindow>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_timeframe_wire_format() {
        let relative: Timeframe =
            serde_json::from_value(json!({"type": "relative", "relativeWindow": "7d"})).unwrap();
        assert_eq!(
            relative,
            Timeframe::Relative {
                window: "7d".parse().unwrap()
            }
        );

        let absolute: Timeframe = serde_json::from_value(json!({
            "type": "absolute",
            "startTimestamp": "2024-01-01T00:00:00Z",
            "endTimestamp": "2024-02-01T00:00:00Z"
        }))
        .unwrap();
        assert!(matches!(absolute, Timeframe::Absolute { .. }));
    }

    #[test]
    fn test_bounding_box_accepts_compass_aliases() {
        let bbox: BoundingBox = serde_json::from_value(json!({
            "north": 10.0, "south": -10.0, "east": 20.0, "west": -20.0
        }))
        .unwrap();
        assert_eq!(bbox.min_lat, -10.0);
        assert_eq!(bbox.max_lng, 20.0);
    }

    #[test]
    fn test_filter_spec_round_trips_as_plain_object() {
        let spec = FilterSpec::new()
            .with(FilterKey::RadioTypes, FilterValue::set(["W", "E"]))
            .with(FilterKey::RssiMin, -70.0)
            .with(FilterKey::Ssid, FilterValue::text("cafe"));

        let encoded = serde_json::to_value(&spec).unwrap();
        assert_eq!(encoded, json!({"ssid": "cafe", "radioTypes": ["W", "E"], "rssiMin": -70.0}));

        let decoded: FilterSpec = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn test_typed_accessors_ignore_empty_values() {
        let spec = FilterSpec::new()
            .with(FilterKey::Ssid, FilterValue::text("   "))
            .with(FilterKey::RadioTypes, FilterValue::Set(vec![]));
        assert_eq!(spec.text(FilterKey::Ssid), None);
        assert_eq!(spec.set(FilterKey::RadioTypes), None);
        assert_eq!(spec.number(FilterKey::RssiMin), None);
    }

    #[test]
    fn test_enabled_set_defaults_to_off() {
        let enabled = EnabledSet::new()
            .enable(FilterKey::RadioTypes)
            .disable(FilterKey::RssiMin);
        assert!(enabled.is_enabled(FilterKey::RadioTypes));
        assert!(!enabled.is_enabled(FilterKey::RssiMin));
        assert!(!enabled.is_enabled(FilterKey::Ssid));
        assert_eq!(enabled.enabled_keys().collect::<Vec<_>>(), vec![FilterKey::RadioTypes]);
        assert!(!enabled.requires_home());
        assert!(enabled.enable(FilterKey::DistanceFromHomeMax).requires_home());
    }

    #[test]
    fn test_emitter_level_keys() {
        assert!(FilterKey::ThreatScoreMin.is_emitter_level());
        assert!(FilterKey::DistanceFromHomeMax.is_emitter_level());
        assert!(!FilterKey::RssiMin.is_emitter_level());
        assert!(!FilterKey::Timeframe.is_emitter_level());
    }

    #[test]
    fn test_preset_load_keeps_disabled_values_inert() {
        let filters = FilterSpec::new()
            .with(FilterKey::RadioTypes, FilterValue::set(["W"]))
            .with(FilterKey::RssiMin, -70.0);
        let enabled = EnabledSet::new()
            .enable(FilterKey::RadioTypes)
            .disable(FilterKey::RssiMin);

        let mut presets = PresetRegistry::new();
        presets.save("wifi only", &filters, &enabled);

        let (loaded_filters, loaded_enabled) = presets.load("wifi only").unwrap().into_parts();
        assert_eq!(loaded_filters, filters);
        assert_eq!(loaded_enabled, enabled);
        assert_eq!(loaded_filters.number(FilterKey::RssiMin), Some(-70.0));
        assert!(!loaded_enabled.is_enabled(FilterKey::RssiMin));
        assert!(presets.load("missing").is_none());
    }

    #[test]
    fn test_preset_save_replaces_and_delete_removes() {
        let mut presets = PresetRegistry::new();
        presets.save("nearby", &FilterSpec::new(), &EnabledSet::new());
        presets.save(
            "nearby",
            &FilterSpec::new().with(FilterKey::Ssid, FilterValue::text("cafe")),
            &EnabledSet::new().enable(FilterKey::Ssid),
        );
        presets.save("all", &FilterSpec::new(), &EnabledSet::new());

        assert_eq!(presets.len(), 2);
        assert_eq!(presets.names().collect::<Vec<_>>(), vec!["all", "nearby"]);
        assert_eq!(
            presets.load("nearby").unwrap().filters.text(FilterKey::Ssid),
            Some("cafe")
        );

        assert!(presets.delete("nearby").is_some());
        assert!(presets.delete("nearby").is_none());
        assert_eq!(presets.names().collect::<Vec<_>>(), vec!["all"]);
    }

    #[test]
    fn test_preset_registry_serializes_as_named_states() {
        let mut presets = PresetRegistry::new();
        presets.save(
            "ble",
            &FilterSpec::new().with(FilterKey::RadioTypes, FilterValue::set(["E"])),
            &EnabledSet::new().enable(FilterKey::RadioTypes),
        );

        let encoded = serde_json::to_value(&presets).unwrap();
        assert_eq!(
            encoded,
            json!({ "ble": { "filters": { "radioTypes": ["E"] }, "enabled": { "radioTypes": true } } })
        );
        let decoded: PresetRegistry = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, presets);
    }
}
