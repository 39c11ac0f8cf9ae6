//! SQL text for each result shape and the list sort map.

use super::sql::{CHANNEL_EXPR, RADIO_CLASS_EXPR, SECURITY_CLASS_EXPR};

/// BSSIDs that are broadcast or placeholder addresses, never real emitters.
const SENTINEL_BSSIDS: &str = "'00:00:00:00:00:00', 'FF:FF:FF:FF:FF:FF'";

fn where_clause(predicates: &[String]) -> String {
    if predicates.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", predicates.join("\n              AND "))
    }
}

/// The CTE chain shared by every shape.
///
/// Stationary confidence weighs spatial spread against a 500 m radius (50%),
/// temporal spread against one week (30%) and density against 50 sightings
/// (20%). Emitters with fewer than two located sightings get NULL.
pub(crate) fn cte_prefix(obs_where: &[String], network_where: &[String]) -> String {
    format!(
        r#"
        WITH obs_raw AS (
            SELECT o.id, o.bssid,
                   COALESCE(NULLIF(o.ssid, ''), e.ssid, '') AS ssid,
                   o.lat, o.lon, o.level, o.accuracy, o.time, o.altitude,
                   UPPER(COALESCE(NULLIF(o.radio_type, ''), e.radio_type, '')) AS radio_type,
                   COALESCE(o.radio_frequency, e.frequency) AS frequency,
                   UPPER(COALESCE(NULLIF(o.radio_capabilities, ''), e.capabilities, '')) AS caps,
                   e.manufacturer, e.first_seen, e.last_seen
            FROM observations o
            LEFT JOIN emitters e ON e.bssid = o.bssid
            WHERE o.bssid NOT IN ({SENTINEL_BSSIDS})
        ),
        obs_base AS (
            SELECT r.*,
                   {RADIO_CLASS_EXPR} AS radio_class,
                   {SECURITY_CLASS_EXPR} AS security_class,
                   {CHANNEL_EXPR} AS channel
            FROM obs_raw r
        ),
        filtered_obs AS (
            SELECT b.*
            FROM obs_base b
            {obs_where}
        ),
        obs_rollup AS (
            SELECT bssid,
                   COUNT(*) AS observation_count,
                   MIN(time) AS first_observed,
                   MAX(time) AS last_observed,
                   AVG(level) AS avg_signal,
                   MIN(level) AS min_signal,
                   MAX(level) AS max_signal
            FROM filtered_obs
            GROUP BY bssid
        ),
        obs_spatial AS (
            SELECT bssid,
                   CASE WHEN COUNT(*) < 2 THEN NULL ELSE ROUND(MIN(1.0, MAX(0.0,
                       (1.0 - MIN(MAX(MAX(lat) - MIN(lat), MAX(lon) - MIN(lon)) * 55660.0 / 500.0, 1.0)) * 0.5
                     + (1.0 - MIN((MAX(time) - MIN(time)) / 3600.0 / 168.0, 1.0)) * 0.3
                     + MIN(COUNT(*) / 50.0, 1.0) * 0.2)), 3)
                   END AS stationary_confidence
            FROM filtered_obs
            WHERE lat IS NOT NULL AND lon IS NOT NULL
            GROUP BY bssid
        ),
        filtered_networks AS (
            SELECT r.bssid, r.observation_count, r.first_observed, r.last_observed,
                   r.avg_signal, r.min_signal, r.max_signal,
                   s.stationary_confidence,
                   ta.score AS threat_score,
                   UPPER(COALESCE(ta.level, 'NONE')) AS threat_level,
                   ta.flags AS threat_flags,
                   ta.signals AS threat_signals
            FROM obs_rollup r
            LEFT JOIN obs_spatial s ON s.bssid = r.bssid
            LEFT JOIN threat_assessments ta ON ta.bssid = r.bssid
            {network_where}
        ),
        obs_latest AS (
            SELECT * FROM (
                SELECT b.*,
                       ROW_NUMBER() OVER (PARTITION BY b.bssid ORDER BY b.time DESC, b.id DESC) AS rn
                FROM filtered_obs b
            )
            WHERE rn = 1
        )"#,
        obs_where = where_clause(obs_where),
        network_where = where_clause(network_where),
    )
}

pub(crate) fn list_sql(prefix: &str, terms: &[SortTerm], limit: &str, offset: &str) -> String {
    format!(
        r#"{prefix}
        SELECT n.bssid, l.ssid, l.radio_class AS radio_type, l.security_class AS security,
               l.frequency, l.channel, l.caps AS capabilities, l.manufacturer,
               l.level AS signal, l.lat, l.lon, l.accuracy, l.time AS observed_at,
               l.first_seen, l.last_seen,
               n.observation_count, n.first_observed, n.last_observed,
               n.avg_signal, n.min_signal, n.max_signal,
               n.stationary_confidence, n.threat_score, n.threat_level,
               n.threat_flags, n.threat_signals,
               COUNT(*) OVER () AS window_total
        FROM filtered_networks n
        JOIN obs_latest l ON l.bssid = n.bssid
        ORDER BY {order_by}
        LIMIT {limit} OFFSET {offset}"#,
        order_by = order_by(terms),
    )
}

pub(crate) fn count_sql(prefix: &str) -> String {
    format!("{prefix}\n        SELECT COUNT(*) AS total FROM filtered_networks")
}

pub(crate) fn geospatial_sql(prefix: &str, limit: &str) -> String {
    format!(
        r#"{prefix}
        SELECT b.id, b.bssid, b.ssid, b.lat, b.lon, b.level AS signal, b.accuracy,
               b.time AS observed_at, b.radio_class AS radio_type, b.security_class AS security,
               b.frequency, n.threat_score, n.threat_level,
               n.threat_flags, n.threat_signals
        FROM filtered_obs b
        JOIN filtered_networks n ON n.bssid = b.bssid
        WHERE b.lat IS NOT NULL AND b.lon IS NOT NULL
        ORDER BY b.time ASC, b.id ASC
        LIMIT {limit}"#
    )
}

pub(crate) fn observations_sql(prefix: &str, limit: &str, offset: &str) -> String {
    format!(
        r#"{prefix}
        SELECT b.id, b.bssid, b.ssid, b.lat, b.lon, b.level AS signal, b.accuracy, b.altitude,
               b.time AS observed_at, b.radio_class AS radio_type, b.frequency,
               b.caps AS capabilities
        FROM filtered_obs b
        ORDER BY b.bssid ASC, b.time DESC, b.id DESC
        LIMIT {limit} OFFSET {offset}"#
    )
}

pub(crate) fn observation_count_sql(prefix: &str) -> String {
    format!("{prefix}\n        SELECT COUNT(*) AS total FROM filtered_obs")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One resolved ORDER BY column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortTerm {
    /// Public sort key, e.g. `last_seen`.
    pub key: &'static str,
    pub column: &'static str,
    pub direction: SortDirection,
}

const DEFAULT_SORT: &str = "last_seen";

/// Public sort keys and the list columns they order by.
const SORT_COLUMNS: &[(&str, &str)] = &[
    ("last_seen", "n.last_observed"),
    ("first_seen", "n.first_observed"),
    ("observations", "n.observation_count"),
    ("signal", "l.level"),
    ("avg_signal", "n.avg_signal"),
    ("ssid", "l.ssid COLLATE NOCASE"),
    ("bssid", "n.bssid"),
    ("threat_score", "n.threat_score"),
    ("stationary_confidence", "n.stationary_confidence"),
    ("frequency", "l.frequency"),
    ("channel", "l.channel"),
    ("type", "l.radio_class"),
    ("security", "l.security_class"),
    ("manufacturer", "l.manufacturer"),
    ("accuracy", "l.accuracy"),
];

fn sort_column(key: &str) -> Option<(&'static str, &'static str)> {
    SORT_COLUMNS.iter().copied().find(|(name, _)| *name == key)
}

/// Resolve comma-separated `sort` / `order` parameters.
///
/// Each sort key takes the direction at the same position in `order`; a
/// shorter `order` list repeats its last entry. Unknown keys fall back to
/// `last_seen` and invalid directions to descending, each with a warning.
pub fn parse_sort(sort: Option<&str>, order: Option<&str>, warnings: &mut Vec<String>) -> Vec<SortTerm> {
    let keys: Vec<&str> = sort
        .unwrap_or(DEFAULT_SORT)
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect();
    let keys = if keys.is_empty() { vec![DEFAULT_SORT] } else { keys };

    let directions: Vec<&str> = order
        .unwrap_or("desc")
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();

    let mut terms: Vec<SortTerm> = Vec::with_capacity(keys.len() + 1);
    for (i, raw_key) in keys.iter().enumerate() {
        let (key, column) = match sort_column(raw_key) {
            Some(found) => found,
            None => {
                warnings.push(format!("unknown sort column '{raw_key}', using {DEFAULT_SORT}"));
                sort_column(DEFAULT_SORT).unwrap_or((DEFAULT_SORT, "n.last_observed"))
            }
        };

        let raw_direction = directions.get(i).or(directions.last()).copied().unwrap_or("desc");
        let direction = match raw_direction.to_ascii_lowercase().as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            _ => {
                warnings.push(format!("invalid sort order '{raw_direction}', using desc"));
                SortDirection::Desc
            }
        };

        if terms.iter().any(|t| t.key == key) {
            continue;
        }
        terms.push(SortTerm { key, column, direction });
    }

    if !terms.iter().any(|t| t.key == "bssid") {
        terms.push(SortTerm {
            key: "bssid",
            column: "n.bssid",
            direction: SortDirection::Asc,
        });
    }
    terms
}

fn order_by(terms: &[SortTerm]) -> String {
    terms
        .iter()
        .map(|t| format!("{} {} NULLS LAST", t.column, t.direction.as_sql()))
        .collect::<Vec<_>>()
        .join(", ")
}
