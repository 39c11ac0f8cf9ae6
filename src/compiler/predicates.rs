//! Key -> predicate fragment table.
//!
//! Observation fragments are written against `obs_base` rows aliased `b`.
//! Emitter fragments are written against `obs_rollup r`, `obs_spatial s` and
//! `threat_assessments ta`.

use crate::filters::{BoundingBox, FilterKey, FilterSpec, RadiusFilter, Timeframe};
use crate::filters::{EnabledSet, NOISE_FLOOR_DBM};
use crate::model::{HomeLocation, METERS_PER_DEGREE};

use super::sql::{
    auth_method_classes, encryption_classes, insecure_flag_classes, security_flag_classes,
    threat_level_code,
};
use super::{CompileOptions, IgnoreReason, ParamSink};

/// Earliest plausible observation time (2000-01-01T00:00:00Z).
const MIN_PLAUSIBLE_TIME: i64 = 946_684_800;

/// Signal levels outside this range are recording artifacts.
const EXTREME_SIGNAL_FLOOR: i64 = -120;

pub(crate) struct FragmentContext<'a> {
    pub(crate) filters: &'a FilterSpec,
    pub(crate) enabled: &'a EnabledSet,
    pub(crate) options: &'a CompileOptions,
    pub(crate) sink: &'a mut ParamSink,
    pub(crate) warnings: &'a mut Vec<String>,
}

/// What one enabled key contributes.
#[derive(Debug, PartialEq)]
pub(crate) enum Fragment {
    Observation(String),
    Emitter(String),
    /// Changes another key's predicate without adding its own.
    Modifier,
    Ignored(IgnoreReason),
}

use Fragment::{Emitter, Ignored, Modifier, Observation};

const WITHOUT_VALUE: Fragment = Ignored(IgnoreReason::EnabledWithoutValue);

pub(crate) fn fragment(key: FilterKey, ctx: &mut FragmentContext<'_>) -> Fragment {
    let f = ctx.filters;
    match key {
        FilterKey::Ssid => match f.text(key) {
            Some(ssid) => {
                let p = ctx.sink.push(format!("%{}%", escape_like(ssid)));
                Observation(format!("b.ssid LIKE {p} ESCAPE '\\'"))
            }
            None => WITHOUT_VALUE,
        },
        FilterKey::Bssid => match f.text(key) {
            Some(bssid) => {
                let bssid = bssid.to_uppercase();
                if bssid.len() == 17 {
                    let p = ctx.sink.push(bssid);
                    Observation(format!("b.bssid = {p}"))
                } else {
                    let p = ctx.sink.push(format!("{}%", escape_like(&bssid)));
                    Observation(format!("b.bssid LIKE {p} ESCAPE '\\'"))
                }
            }
            None => WITHOUT_VALUE,
        },
        FilterKey::Manufacturer => match f.text(key) {
            Some(manufacturer) => match coerce_oui(manufacturer) {
                Some(oui) => {
                    let p = ctx.sink.push(oui);
                    Observation(format!("SUBSTR(b.bssid, 1, 8) = {p}"))
                }
                None => {
                    let p = ctx.sink.push(format!("%{}%", escape_like(manufacturer)));
                    Observation(format!("b.manufacturer LIKE {p} ESCAPE '\\'"))
                }
            },
            None => WITHOUT_VALUE,
        },
        FilterKey::NetworkId => Ignored(IgnoreReason::UnsupportedForShape),
        FilterKey::RadioTypes => match f.set(key) {
            Some(types) => Observation(format!("b.radio_class IN ({})", push_all(ctx.sink, types))),
            None => WITHOUT_VALUE,
        },
        FilterKey::FrequencyBands => match f.set(key) {
            Some(bands) => {
                let clauses: Vec<&str> = bands.iter().filter_map(|b| band_clause(b)).collect();
                if clauses.is_empty() {
                    WITHOUT_VALUE
                } else {
                    Observation(format!("({})", clauses.join(" OR ")))
                }
            }
            None => WITHOUT_VALUE,
        },
        FilterKey::ChannelMin => compare(ctx, key, "b.channel", ">=", Observation),
        FilterKey::ChannelMax => compare(ctx, key, "b.channel", "<=", Observation),
        FilterKey::RssiMin => compare(ctx, key, "b.level", ">=", Observation),
        FilterKey::RssiMax => match f.number(key) {
            Some(max) => {
                let floor = ctx.sink.push(NOISE_FLOOR_DBM);
                let p = ctx.sink.push(max);
                Observation(format!("b.level BETWEEN {floor} AND {p}"))
            }
            None => WITHOUT_VALUE,
        },
        FilterKey::EncryptionTypes => security_in(ctx, key, encryption_classes),
        FilterKey::AuthMethods => security_in(ctx, key, auth_method_classes),
        FilterKey::InsecureFlags => security_in(ctx, key, insecure_flag_classes),
        FilterKey::SecurityFlags => security_in(ctx, key, security_flag_classes),
        FilterKey::Timeframe => match f.timeframe() {
            Some(timeframe) => timeframe_fragment(timeframe, ctx),
            None => WITHOUT_VALUE,
        },
        FilterKey::TemporalScope => {
            let timeframe_applies = ctx.enabled.is_enabled(FilterKey::Timeframe)
                && f.timeframe().is_some();
            if !timeframe_applies {
                Ignored(IgnoreReason::RequiresTimeframe)
            } else if f.text(key).is_some() {
                Modifier
            } else {
                WITHOUT_VALUE
            }
        }
        FilterKey::ObservationCountMin => compare(ctx, key, "r.observation_count", ">=", Emitter),
        FilterKey::ObservationCountMax => compare(ctx, key, "r.observation_count", "<=", Emitter),
        FilterKey::GpsAccuracyMax => match f.number(key) {
            Some(max) => {
                let p = ctx.sink.push(max);
                Observation(format!(
                    "b.accuracy IS NOT NULL AND b.accuracy > 0 AND b.accuracy <= {p}"
                ))
            }
            None => WITHOUT_VALUE,
        },
        FilterKey::ExcludeInvalidCoords => match f.flag(key) {
            Some(false) => WITHOUT_VALUE,
            _ => Observation(
                "b.lat IS NOT NULL AND b.lon IS NOT NULL \
                 AND b.lat BETWEEN -90 AND 90 AND b.lon BETWEEN -180 AND 180"
                    .to_string(),
            ),
        },
        FilterKey::QualityFilter => match f.text(key).and_then(quality_clause) {
            Some(clause) => Observation(clause),
            None => WITHOUT_VALUE,
        },
        FilterKey::DistanceFromHomeMin => distance_from_home(ctx, key, ">="),
        FilterKey::DistanceFromHomeMax => distance_from_home(ctx, key, "<="),
        FilterKey::BoundingBox => match f.bounding_box() {
            Some(bbox) => Observation(bounding_box_clause(bbox, ctx.sink)),
            None => WITHOUT_VALUE,
        },
        FilterKey::RadiusFilter => match f.radius() {
            Some(radius) => Observation(radius_clause(radius, ctx.sink)),
            None => WITHOUT_VALUE,
        },
        FilterKey::ThreatScoreMin => compare(ctx, key, "COALESCE(ta.score, 0)", ">=", Emitter),
        FilterKey::ThreatScoreMax => compare(ctx, key, "COALESCE(ta.score, 0)", "<=", Emitter),
        FilterKey::ThreatCategories => match f.set(key) {
            Some(categories) => {
                let codes: Vec<&str> = categories.iter().filter_map(|c| threat_level_code(c)).collect();
                if codes.is_empty() {
                    WITHOUT_VALUE
                } else {
                    let placeholders = push_all(ctx.sink, &codes);
                    Emitter(format!("UPPER(COALESCE(ta.level, 'NONE')) IN ({placeholders})"))
                }
            }
            None => WITHOUT_VALUE,
        },
        FilterKey::StationaryConfidenceMin => {
            compare(ctx, key, "s.stationary_confidence", ">=", Emitter)
        }
        FilterKey::StationaryConfidenceMax => {
            compare(ctx, key, "s.stationary_confidence", "<=", Emitter)
        }
    }
}

fn compare(
    ctx: &mut FragmentContext<'_>,
    key: FilterKey,
    column: &str,
    op: &str,
    wrap: fn(String) -> Fragment,
) -> Fragment {
    match ctx.filters.number(key) {
        Some(value) => {
            let p = ctx.sink.push(value);
            wrap(format!("{column} {op} {p}"))
        }
        None => WITHOUT_VALUE,
    }
}

fn push_all<S: AsRef<str>>(sink: &mut ParamSink, values: &[S]) -> String {
    values
        .iter()
        .map(|v| sink.push(v.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Set-valued security keys all reduce to a set of security classes.
fn security_in(
    ctx: &mut FragmentContext<'_>,
    key: FilterKey,
    classes_for: fn(&str) -> &'static [&'static str],
) -> Fragment {
    let Some(values) = ctx.filters.set(key) else {
        return WITHOUT_VALUE;
    };
    let mut classes: Vec<&'static str> = Vec::new();
    for value in values {
        for class in classes_for(value) {
            if !classes.contains(class) {
                classes.push(*class);
            }
        }
    }
    if classes.is_empty() {
        return WITHOUT_VALUE;
    }
    Observation(format!("b.security_class IN ({})", push_all(ctx.sink, &classes)))
}

fn band_clause(band: &str) -> Option<&'static str> {
    match band {
        "2.4GHz" => Some("b.frequency BETWEEN 2412 AND 2484"),
        "5GHz" => Some("b.frequency BETWEEN 5000 AND 5900"),
        "6GHz" => Some("b.frequency BETWEEN 5925 AND 7125"),
        "BLE" => Some("b.radio_class = 'E'"),
        "Cellular" => Some("b.radio_class IN ('L', 'G', 'N')"),
        _ => None,
    }
}

fn quality_clause(mode: &str) -> Option<String> {
    let temporal = format!("b.time >= {MIN_PLAUSIBLE_TIME}");
    let extreme = format!("(b.level IS NULL OR b.level BETWEEN {EXTREME_SIGNAL_FLOOR} AND 0)");
    let duplicate = "COALESCE(b.lat = 0 AND b.lon = 0, 0) = 0".to_string();
    match mode {
        "temporal" => Some(temporal),
        "extreme" => Some(extreme),
        "duplicate" => Some(duplicate),
        "all" => Some(format!("{temporal} AND {extreme} AND {duplicate}")),
        _ => None,
    }
}

fn timeframe_fragment(timeframe: &Timeframe, ctx: &mut FragmentContext<'_>) -> Fragment {
    let scope = if ctx.enabled.is_enabled(FilterKey::TemporalScope) {
        ctx.filters.text(FilterKey::TemporalScope)
    } else {
        None
    };
    let lifetime = scope == Some("network_lifetime");
    if scope == Some("threat_window") {
        ctx.warnings
            .push("threat_window scope has no threat timestamps; using observation time".into());
    }

    match timeframe {
        Timeframe::Relative { window } => {
            let p = ctx.sink.push(window.cutoff(ctx.options.now).timestamp());
            let column = if lifetime { "b.last_seen" } else { "b.time" };
            Observation(format!("{column} >= {p}"))
        }
        Timeframe::Absolute { start, end } => {
            let start = ctx.sink.push(start.timestamp());
            let end = ctx.sink.push(end.timestamp());
            if lifetime {
                Observation(format!("b.first_seen >= {start} AND b.last_seen <= {end}"))
            } else {
                Observation(format!("b.time BETWEEN {start} AND {end}"))
            }
        }
    }
}

fn bounding_box_clause(bbox: &BoundingBox, sink: &mut ParamSink) -> String {
    let min_lat = sink.push(bbox.min_lat);
    let max_lat = sink.push(bbox.max_lat);
    let min_lng = sink.push(bbox.min_lng);
    let max_lng = sink.push(bbox.max_lng);
    format!("b.lat BETWEEN {min_lat} AND {max_lat} AND b.lon BETWEEN {min_lng} AND {max_lng}")
}

/// Squared equirectangular distance in m² from a fixed point to `b.lat/b.lon`.
fn squared_distance(lat: f64, lon: f64, sink: &mut ParamSink) -> String {
    let anchor = HomeLocation { lat, lon };
    let lat = sink.push(lat);
    let lon = sink.push(lon);
    let kx = sink.push(anchor.meters_per_degree_lon());
    format!(
        "((b.lon - {lon}) * {kx}) * ((b.lon - {lon}) * {kx}) \
         + ((b.lat - {lat}) * {METERS_PER_DEGREE}) * ((b.lat - {lat}) * {METERS_PER_DEGREE})"
    )
}

fn radius_clause(radius: &RadiusFilter, sink: &mut ParamSink) -> String {
    let distance = squared_distance(radius.latitude, radius.longitude, sink);
    let r2 = sink.push(radius.radius_meters * radius.radius_meters);
    format!("{distance} <= {r2}")
}

fn distance_from_home(ctx: &mut FragmentContext<'_>, key: FilterKey, op: &str) -> Fragment {
    let Some(meters) = ctx.filters.number(key) else {
        return WITHOUT_VALUE;
    };
    let Some(home) = ctx.options.home else {
        return Ignored(IgnoreReason::HomeLocationMissing);
    };
    let distance = squared_distance(home.lat, home.lon, ctx.sink);
    let threshold = ctx.sink.push(meters * meters);
    Observation(format!("{distance} {op} {threshold}"))
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Normalize a 24-bit OUI (`AABBCC`, `aa:bb:cc`, `AA-BB-CC`) to `AA:BB:CC`.
pub(crate) fn coerce_oui(value: &str) -> Option<String> {
    let hex: String = value
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let hex = hex.to_uppercase();
    Some(format!("{}:{}:{}", &hex[0..2], &hex[2..4], &hex[4..6]))
}
