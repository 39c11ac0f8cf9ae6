//! Request payload validation.
//!
//! Turns the raw `filters` / `enabled` query parameters into a typed
//! [`FilterSpec`] and [`EnabledSet`]. Every violation is collected before
//! returning, so a caller sees the complete list in one 400 response.
//!
//! Only enabled keys are parsed. A disabled key may carry any value at all,
//! and that value is dropped here without inspection.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::filters::{
    BoundingBox, EnabledSet, FilterKey, FilterSpec, FilterValue, RadiusFilter, Timeframe,
    ValueKind,
};
use crate::model::FilterParams;

/// Longest accepted text filter.
const MAX_TEXT_LEN: usize = 256;

/// Most emitters a single selection may name.
const MAX_SELECTION: usize = 10_000;

/// One invalid request parameter.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    pub parameter: String,
    pub error: String,
}

impl FieldError {
    fn new(parameter: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            error: error.into(),
        }
    }
}

/// Every violation found in one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} invalid request parameter(s)", .errors.len())]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

/// Typed, validated filter state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedFilters {
    /// Values of enabled keys only.
    pub filters: FilterSpec,
    pub enabled: EnabledSet,
}

/// Pagination defaults and ceilings for one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub default_limit: u32,
    pub max_limit: u32,
    /// The route only makes sense for an explicit set of emitters.
    pub requires_selection: bool,
}

impl LimitPolicy {
    pub const LIST: LimitPolicy = LimitPolicy {
        default_limit: 500,
        max_limit: 5000,
        requires_selection: false,
    };

    pub const OBSERVATIONS: LimitPolicy = LimitPolicy {
        default_limit: 1000,
        max_limit: 100_000,
        requires_selection: true,
    };

    /// Geospatial routes cap at the configured render budget.
    pub fn geospatial(render_budget: u32) -> LimitPolicy {
        LimitPolicy {
            default_limit: 5000.min(render_budget),
            max_limit: render_budget,
            requires_selection: false,
        }
    }
}

/// A fully validated request.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub filters: ValidatedFilters,
    pub limit: u32,
    pub offset: u64,
    /// Upper-cased BSSIDs of the explicit selection.
    pub selection: Vec<String>,
}

/// Validate raw `filters` / `enabled` JSON text. Missing parameters count as
/// empty objects.
pub fn validate_json(
    filters: Option<&str>,
    enabled: Option<&str>,
) -> Result<ValidatedFilters, ValidationErrors> {
    let mut errors = Vec::new();
    let validated = collect_filters(filters, enabled, &mut errors);
    finish(validated, errors)
}

/// Validate already decoded `filters` / `enabled` values.
pub fn validate(filters: &Value, enabled: &Value) -> Result<ValidatedFilters, ValidationErrors> {
    let mut errors = Vec::new();
    let validated = validate_values(filters, enabled, &mut errors);
    finish(validated, errors)
}

/// Validate a whole request: filters, pagination and selection.
pub fn validate_request(
    params: &FilterParams,
    policy: LimitPolicy,
) -> Result<ValidatedRequest, ValidationErrors> {
    let mut errors = Vec::new();

    let filters = collect_filters(params.filters.as_deref(), params.enabled.as_deref(), &mut errors);
    let limit = parse_limit(params.limit.as_deref(), policy, &mut errors);
    let offset = parse_offset(params.offset.as_deref(), &mut errors);
    let selection = parse_selection(params.bssids.as_deref(), &mut errors);

    if policy.requires_selection && selection.is_empty() {
        errors.push(FieldError::new(
            "bssids",
            "at least one BSSID must be selected",
        ));
    }

    finish(
        ValidatedRequest {
            filters,
            limit,
            offset,
            selection,
        },
        errors,
    )
}

fn finish<T>(value: T, errors: Vec<FieldError>) -> Result<T, ValidationErrors> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(ValidationErrors { errors })
    }
}

fn collect_filters(
    filters: Option<&str>,
    enabled: Option<&str>,
    errors: &mut Vec<FieldError>,
) -> ValidatedFilters {
    let filters = decode_object("filters", filters, errors);
    let enabled = decode_object("enabled", enabled, errors);
    validate_values(&filters, &enabled, errors)
}

fn decode_object(parameter: &str, raw: Option<&str>, errors: &mut Vec<FieldError>) -> Value {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Value::Object(Map::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(e) => {
            errors.push(FieldError::new(parameter, format!("malformed JSON: {e}")));
            Value::Object(Map::new())
        }
    }
}

fn validate_values(filters: &Value, enabled: &Value, errors: &mut Vec<FieldError>) -> ValidatedFilters {
    let mut validated = ValidatedFilters::default();

    let Some(enabled_map) = as_object("enabled", enabled, errors) else {
        return validated;
    };
    for (name, on) in enabled_map {
        let parameter = format!("enabled.{name}");
        let Ok(key) = name.parse::<FilterKey>() else {
            errors.push(FieldError::new(parameter, "unknown filter key"));
            continue;
        };
        match on {
            Value::Bool(on) => validated.enabled.set(key, *on),
            _ => errors.push(FieldError::new(parameter, "must be true or false")),
        }
    }

    let Some(filter_map) = as_object("filters", filters, errors) else {
        return validated;
    };
    for (name, raw) in filter_map {
        let parameter = format!("filters.{name}");
        let Ok(key) = name.parse::<FilterKey>() else {
            errors.push(FieldError::new(parameter, "unknown filter key"));
            continue;
        };
        if !validated.enabled.is_enabled(key) || raw.is_null() {
            continue;
        }
        match parse_value(key, raw) {
            Ok(value) => validated.filters.insert(key, value),
            Err(message) => errors.push(FieldError::new(parameter, message)),
        }
    }

    check_ranges(&validated, errors);
    validated
}

fn as_object<'a>(
    parameter: &str,
    value: &'a Value,
    errors: &mut Vec<FieldError>,
) -> Option<&'a Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Null => None,
        _ => {
            errors.push(FieldError::new(parameter, "must be a JSON object"));
            None
        }
    }
}

/// Enabled min/max pairs must not be inverted.
fn check_ranges(validated: &ValidatedFilters, errors: &mut Vec<FieldError>) {
    for max_key in FilterKey::ALL {
        let Some(min_key) = max_key.range_floor() else {
            continue;
        };
        let (Some(min), Some(max)) = (
            validated.filters.number(min_key),
            validated.filters.number(max_key),
        ) else {
            continue;
        };
        if min > max {
            errors.push(FieldError::new(
                format!("filters.{max_key}"),
                format!("must be greater than or equal to {min_key}"),
            ));
        }
    }
}

/// Parse one enabled, non-null value for its key.
pub fn parse_value(key: FilterKey, raw: &Value) -> Result<FilterValue, String> {
    match key.kind() {
        ValueKind::Text => {
            let text = raw.as_str().ok_or("must be a string")?;
            if text.len() > MAX_TEXT_LEN {
                return Err(format!("must be at most {MAX_TEXT_LEN} characters"));
            }
            Ok(FilterValue::text(text))
        }
        ValueKind::Choice(vocabulary) => {
            let word = raw.as_str().ok_or("must be a string")?;
            if vocabulary.contains(&word) {
                Ok(FilterValue::text(word))
            } else {
                Err(format!("must be one of {}", vocabulary.join(", ")))
            }
        }
        ValueKind::Set(vocabulary) => {
            let items = raw.as_array().ok_or("must be an array")?;
            if items.is_empty() {
                return Err("must not be empty".to_string());
            }
            let mut words: Vec<String> = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(word) if vocabulary.contains(&word) => {
                        if !words.iter().any(|w| w == word) {
                            words.push(word.to_string());
                        }
                    }
                    Some(word) => {
                        return Err(format!(
                            "unknown value '{word}', expected one of {}",
                            vocabulary.join(", ")
                        ));
                    }
                    None => return Err("must contain only strings".to_string()),
                }
            }
            Ok(FilterValue::Set(words))
        }
        ValueKind::Number { min, max, integral } => {
            let n = as_number(raw).ok_or("must be a finite number")?;
            if integral && n.fract() != 0.0 {
                return Err("must be an integer".to_string());
            }
            if key == FilterKey::GpsAccuracyMax && n <= 0.0 {
                return Err("must be greater than 0".to_string());
            }
            if n < min || n > max {
                return Err(describe_bounds(min, max));
            }
            Ok(FilterValue::Number(n))
        }
        ValueKind::Flag => raw
            .as_bool()
            .map(FilterValue::Flag)
            .ok_or_else(|| "must be true or false".to_string()),
        ValueKind::Timeframe => parse_timeframe(raw).map(FilterValue::Timeframe),
        ValueKind::BoundingBox => parse_bounding_box(raw).map(FilterValue::BoundingBox),
        ValueKind::Radius => parse_radius(raw).map(FilterValue::Radius),
    }
}

fn as_number(raw: &Value) -> Option<f64> {
    let n = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn describe_bounds(min: f64, max: f64) -> String {
    if max == f64::MAX {
        format!("must be at least {min}")
    } else {
        format!("must be between {min} and {max}")
    }
}

fn parse_timeframe(raw: &Value) -> Result<Timeframe, String> {
    let timeframe: Timeframe =
        serde_json::from_value(raw.clone()).map_err(|e| format!("invalid timeframe: {e}"))?;
    if let Timeframe::Absolute { start, end } = &timeframe {
        if start > end {
            return Err("startTimestamp must not be after endTimestamp".to_string());
        }
    }
    Ok(timeframe)
}

fn parse_bounding_box(raw: &Value) -> Result<BoundingBox, String> {
    let bbox: BoundingBox =
        serde_json::from_value(raw.clone()).map_err(|e| format!("invalid bounding box: {e}"))?;
    let corners = [bbox.min_lat, bbox.max_lat, bbox.min_lng, bbox.max_lng];
    if corners.iter().any(|c| !c.is_finite()) {
        return Err("bounding box coordinates must be finite".to_string());
    }
    if !(-90.0..=90.0).contains(&bbox.min_lat) || !(-90.0..=90.0).contains(&bbox.max_lat) {
        return Err("latitudes must be between -90 and 90".to_string());
    }
    if !(-180.0..=180.0).contains(&bbox.min_lng) || !(-180.0..=180.0).contains(&bbox.max_lng) {
        return Err("longitudes must be between -180 and 180".to_string());
    }
    if bbox.min_lat >= bbox.max_lat {
        return Err("minLat must be less than maxLat".to_string());
    }
    if bbox.min_lng >= bbox.max_lng {
        return Err("minLng must be less than maxLng".to_string());
    }
    Ok(bbox)
}

fn parse_radius(raw: &Value) -> Result<RadiusFilter, String> {
    let radius: RadiusFilter =
        serde_json::from_value(raw.clone()).map_err(|e| format!("invalid radius filter: {e}"))?;
    if !radius.latitude.is_finite() || !(-90.0..=90.0).contains(&radius.latitude) {
        return Err("latitude must be between -90 and 90".to_string());
    }
    if !radius.longitude.is_finite() || !(-180.0..=180.0).contains(&radius.longitude) {
        return Err("longitude must be between -180 and 180".to_string());
    }
    if !radius.radius_meters.is_finite() || radius.radius_meters <= 0.0 {
        return Err("radiusMeters must be greater than 0".to_string());
    }
    Ok(radius)
}

/// Limits above the route maximum are clamped to it.
fn parse_limit(raw: Option<&str>, policy: LimitPolicy, errors: &mut Vec<FieldError>) -> u32 {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return policy.default_limit;
    };
    match raw.parse::<u64>() {
        Ok(limit) if limit >= 1 => u32::try_from(limit)
            .unwrap_or(u32::MAX)
            .min(policy.max_limit),
        _ => {
            errors.push(FieldError::new("limit", "must be a positive integer"));
            policy.default_limit
        }
    }
}

fn parse_offset(raw: Option<&str>, errors: &mut Vec<FieldError>) -> u64 {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return 0;
    };
    match raw.parse::<u64>() {
        Ok(offset) if offset <= i64::MAX as u64 => offset,
        _ => {
            errors.push(FieldError::new("offset", "must be a non-negative integer"));
            0
        }
    }
}

fn parse_selection(raw: Option<&str>, errors: &mut Vec<FieldError>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };
    let items = match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(items) => items,
        Err(_) => {
            errors.push(FieldError::new("bssids", "must be a JSON array of strings"));
            return Vec::new();
        }
    };
    if items.len() > MAX_SELECTION {
        errors.push(FieldError::new(
            "bssids",
            format!("must name at most {MAX_SELECTION} emitters"),
        ));
        return Vec::new();
    }

    let mut selection: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str().map(str::trim) {
            Some(bssid) if !bssid.is_empty() => {
                let bssid = bssid.to_uppercase();
                if !selection.contains(&bssid) {
                    selection.push(bssid);
                }
            }
            _ => {
                errors.push(FieldError::new("bssids", "must contain only non-empty strings"));
                return Vec::new();
            }
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(filters: Value, enabled: Value) -> FilterParams {
        FilterParams {
            filters: Some(filters.to_string()),
            enabled: Some(enabled.to_string()),
            ..FilterParams::default()
        }
    }

    fn parameters(err: &ValidationErrors) -> Vec<&str> {
        err.errors.iter().map(|e| e.parameter.as_str()).collect()
    }

    #[test]
    fn test_disabled_values_are_never_parsed() {
        let validated = validate(
            &json!({"rssiMin": "not a number", "radioTypes": ["W"]}),
            &json!({"rssiMin": false, "radioTypes": true}),
        )
        .unwrap();

        assert!(!validated.filters.contains(FilterKey::RssiMin));
        assert_eq!(validated.filters.set(FilterKey::RadioTypes), Some(&["W".to_string()][..]));
    }

    #[test]
    fn test_enabled_key_without_value_is_not_an_error() {
        let validated = validate(&json!({"ssid": null}), &json!({"ssid": true, "bssid": true})).unwrap();
        assert!(validated.enabled.is_enabled(FilterKey::Ssid));
        assert!(validated.filters.is_empty());
    }

    #[test]
    fn test_collects_every_violation() {
        let err = validate(
            &json!({
                "rssiMin": -200,
                "radioTypes": [],
                "encryptionTypes": ["WPA9"],
                "bogus": 1,
                "timeframe": {"type": "relative", "relativeWindow": "7x"}
            }),
            &json!({
                "rssiMin": true,
                "radioTypes": true,
                "encryptionTypes": true,
                "timeframe": true,
                "channelMin": "yes"
            }),
        )
        .unwrap_err();

        let mut found = parameters(&err);
        found.sort();
        assert_eq!(
            found,
            vec![
                "enabled.channelMin",
                "filters.bogus",
                "filters.encryptionTypes",
                "filters.radioTypes",
                "filters.rssiMin",
                "filters.timeframe",
            ]
        );
    }

    #[test]
    fn test_inverted_range_is_rejected_only_when_both_enabled() {
        let filters = json!({"rssiMin": -40, "rssiMax": -80});

        let err = validate(&filters, &json!({"rssiMin": true, "rssiMax": true})).unwrap_err();
        assert_eq!(parameters(&err), vec!["filters.rssiMax"]);

        assert!(validate(&filters, &json!({"rssiMin": true, "rssiMax": false})).is_ok());
    }

    #[test]
    fn test_numeric_domains() {
        assert!(parse_value(FilterKey::RssiMin, &json!(-95)).is_ok());
        assert!(parse_value(FilterKey::RssiMin, &json!(-96)).is_err());
        assert!(parse_value(FilterKey::RssiMin, &json!("-70")).is_ok());
        assert!(parse_value(FilterKey::ChannelMin, &json!(6.5)).is_err());
        assert!(parse_value(FilterKey::GpsAccuracyMax, &json!(0)).is_err());
        assert!(parse_value(FilterKey::GpsAccuracyMax, &json!(1000)).is_ok());
        assert!(parse_value(FilterKey::ThreatScoreMax, &json!(101)).is_err());
        assert!(parse_value(FilterKey::StationaryConfidenceMin, &json!(0.75)).is_ok());
        assert!(parse_value(FilterKey::StationaryConfidenceMin, &json!("NaN")).is_err());
    }

    #[test]
    fn test_timeframe_values() {
        assert!(parse_value(FilterKey::Timeframe, &json!({"type": "relative", "relativeWindow": "24h"})).is_ok());
        assert!(parse_value(FilterKey::Timeframe, &json!({"type": "relative", "relativeWindow": "all"})).is_err());
        assert!(
            parse_value(
                FilterKey::Timeframe,
                &json!({
                    "type": "absolute",
                    "startTimestamp": "2024-03-01T00:00:00Z",
                    "endTimestamp": "2024-02-01T00:00:00Z"
                })
            )
            .is_err()
        );
        assert!(
            parse_value(
                FilterKey::Timeframe,
                &json!({"type": "absolute", "startTimestamp": "2024-03-01T00:00:00Z"})
            )
            .is_err()
        );
    }

    #[test]
    fn test_bounding_box_values() {
        assert!(parse_value(FilterKey::BoundingBox, &json!({"north": 1, "south": 0, "east": 1, "west": 0})).is_ok());
        assert!(parse_value(FilterKey::BoundingBox, &json!({"minLat": 1, "maxLat": 0, "minLng": 0, "maxLng": 1})).is_err());
        assert!(parse_value(FilterKey::BoundingBox, &json!({"minLat": 0, "maxLat": 95, "minLng": 0, "maxLng": 1})).is_err());
        assert!(parse_value(FilterKey::BoundingBox, &json!({"minLat": 0, "maxLat": 1})).is_err());
    }

    #[test]
    fn test_malformed_json_reports_parameter() {
        let err = validate_json(Some("{not json"), Some("[]")).unwrap_err();
        assert_eq!(parameters(&err), vec!["filters", "enabled"]);
    }

    #[test]
    fn test_request_pagination_and_selection() {
        let mut request = params(json!({}), json!({}));
        request.limit = Some("0".to_string());
        request.offset = Some("-1".to_string());
        request.bssids = Some("not-json".to_string());

        let err = validate_request(&request, LimitPolicy::LIST).unwrap_err();
        assert_eq!(parameters(&err), vec!["limit", "offset", "bssids"]);

        let mut request = params(json!({}), json!({}));
        request.bssids = Some(json!(["aa:bb:cc:dd:ee:ff", "AA:BB:CC:DD:EE:FF"]).to_string());
        let validated = validate_request(&request, LimitPolicy::LIST).unwrap();
        assert_eq!(validated.limit, 500);
        assert_eq!(validated.selection, vec!["AA:BB:CC:DD:EE:FF".to_string()]);
    }

    #[test]
    fn test_observations_require_selection() {
        let err = validate_request(&params(json!({}), json!({})), LimitPolicy::OBSERVATIONS).unwrap_err();
        assert_eq!(parameters(&err), vec!["bssids"]);
    }

    #[test]
    fn test_limit_is_clamped_to_route_maximum() {
        let mut request = params(json!({}), json!({}));
        request.limit = Some("6000".to_string());
        assert_eq!(validate_request(&request, LimitPolicy::LIST).unwrap().limit, 5000);
        request.limit = Some("99999999999".to_string());
        assert_eq!(validate_request(&request, LimitPolicy::LIST).unwrap().limit, 5000);
        request.limit = Some("250".to_string());
        assert_eq!(validate_request(&request, LimitPolicy::LIST).unwrap().limit, 250);
    }

    #[test]
    fn test_zero_or_non_numeric_limit_is_rejected() {
        let mut request = params(json!({}), json!({}));
        for raw in ["0", "-5", "ten", "1.5"] {
            request.limit = Some(raw.to_string());
            let err = validate_request(&request, LimitPolicy::LIST).unwrap_err();
            assert_eq!(parameters(&err), vec!["limit"], "{raw}");
        }
    }
}
