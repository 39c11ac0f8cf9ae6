//! Analytics bundle and the dashboard's single-statement aggregates.
//!
//! Every statement carries the same CTE prefix and the same parameters, so
//! the bundle can run inside one transaction against one parameter list.

use crate::filters::{EnabledSet, FilterKey, FilterSpec};

use super::{
    CompileOptions, CompiledQuery, FilterTransparency, IgnoredFilter, Pipeline, PipelineMode,
    SqlParam,
};

/// The statements of the analytics bundle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyticsStatement {
    NetworkTypes,
    SignalStrength,
    Security,
    ThreatDistribution,
    HourlyActivity,
    RadioTypesOverTime,
    ThreatTrends,
    TopNetworks,
}

impl AnalyticsStatement {
    pub const ALL: [AnalyticsStatement; 8] = [
        AnalyticsStatement::NetworkTypes,
        AnalyticsStatement::SignalStrength,
        AnalyticsStatement::Security,
        AnalyticsStatement::ThreatDistribution,
        AnalyticsStatement::HourlyActivity,
        AnalyticsStatement::RadioTypesOverTime,
        AnalyticsStatement::ThreatTrends,
        AnalyticsStatement::TopNetworks,
    ];

    fn body(&self) -> &'static str {
        match self {
            AnalyticsStatement::NetworkTypes => {
                "SELECT l.radio_class AS label, COUNT(*) AS count
        FROM filtered_networks n
        JOIN obs_latest l ON l.bssid = n.bssid
        GROUP BY l.radio_class
        ORDER BY count DESC, label ASC"
            }
            // Buckets are 10 dBm wide, keyed by their lower bound.
            AnalyticsStatement::SignalStrength => {
                "SELECT CAST((b.level + 200) / 10 AS INTEGER) * 10 - 200 AS bucket, COUNT(*) AS count
        FROM filtered_obs b
        JOIN filtered_networks n ON n.bssid = b.bssid
        WHERE b.level IS NOT NULL
        GROUP BY bucket
        ORDER BY bucket ASC"
            }
            AnalyticsStatement::Security => {
                "SELECT l.security_class AS label, COUNT(DISTINCT n.bssid) AS count
        FROM filtered_networks n
        JOIN obs_latest l ON l.bssid = n.bssid
        GROUP BY l.security_class
        ORDER BY count DESC, label ASC"
            }
            AnalyticsStatement::ThreatDistribution => {
                "SELECT n.threat_level AS label, COUNT(*) AS count
        FROM filtered_networks n
        GROUP BY n.threat_level
        ORDER BY CASE n.threat_level
            WHEN 'CRITICAL' THEN 0 WHEN 'HIGH' THEN 1 WHEN 'MED' THEN 2
            WHEN 'LOW' THEN 3 ELSE 4 END"
            }
            AnalyticsStatement::HourlyActivity => {
                "SELECT CAST(strftime('%H', b.time, 'unixepoch') AS INTEGER) AS bucket, COUNT(*) AS count
        FROM filtered_obs b
        JOIN filtered_networks n ON n.bssid = b.bssid
        WHERE b.time IS NOT NULL
        GROUP BY bucket
        ORDER BY bucket ASC"
            }
            AnalyticsStatement::RadioTypesOverTime => {
                "SELECT date(b.time, 'unixepoch') AS day, b.radio_class AS label,
               COUNT(DISTINCT b.bssid) AS count
        FROM filtered_obs b
        JOIN filtered_networks n ON n.bssid = b.bssid
        WHERE b.time IS NOT NULL
        GROUP BY day, label
        ORDER BY day ASC, label ASC"
            }
            AnalyticsStatement::ThreatTrends => {
                "SELECT date(b.time, 'unixepoch') AS day,
               AVG(n.threat_score) AS avg_score,
               COUNT(DISTINCT CASE WHEN n.threat_level <> 'NONE' THEN b.bssid END) AS flagged,
               COUNT(DISTINCT b.bssid) AS total
        FROM filtered_obs b
        JOIN filtered_networks n ON n.bssid = b.bssid
        WHERE b.time IS NOT NULL
        GROUP BY day
        ORDER BY day ASC"
            }
            AnalyticsStatement::TopNetworks => {
                "SELECT n.bssid, l.ssid, n.observation_count, n.threat_score, n.threat_level
        FROM filtered_networks n
        JOIN obs_latest l ON l.bssid = n.bssid
        ORDER BY n.observation_count DESC, n.bssid ASC
        LIMIT 50"
            }
        }
    }
}

/// The compiled bundle. All statements bind `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsQueries {
    pub statements: Vec<(AnalyticsStatement, String)>,
    pub params: Vec<SqlParam>,
    pub applied_filters: Vec<FilterKey>,
    pub ignored_filters: Vec<IgnoredFilter>,
    pub warnings: Vec<String>,
}

impl AnalyticsQueries {
    pub fn transparency(&self) -> FilterTransparency {
        FilterTransparency {
            applied_filters: self.applied_filters.clone(),
            ignored_filters: self.ignored_filters.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

pub fn compile_analytics(
    filters: &FilterSpec,
    enabled: &EnabledSet,
    options: &CompileOptions,
) -> AnalyticsQueries {
    let pipeline = Pipeline::build(filters, enabled, PipelineMode::Networks, options);
    let prefix = pipeline.cte_prefix();
    let statements = AnalyticsStatement::ALL
        .into_iter()
        .map(|statement| (statement, format!("{prefix}\n        {}", statement.body())))
        .collect();

    let compiled = pipeline.finish(String::new());
    AnalyticsQueries {
        statements,
        params: compiled.params,
        applied_filters: compiled.applied_filters,
        ignored_filters: compiled.ignored_filters,
        warnings: compiled.warnings,
    }
}

/// Network and observation totals with a per-radio breakdown.
pub fn compile_dashboard_metrics(
    filters: &FilterSpec,
    enabled: &EnabledSet,
    options: &CompileOptions,
) -> CompiledQuery {
    let pipeline = Pipeline::build(filters, enabled, PipelineMode::Networks, options);
    let sql = format!(
        r#"{prefix}
        SELECT COUNT(*) AS networks,
               COALESCE(SUM(n.observation_count), 0) AS observations,
               COALESCE(SUM(CASE WHEN l.radio_class = 'W' THEN 1 ELSE 0 END), 0) AS wifi,
               COALESCE(SUM(CASE WHEN l.radio_class = 'E' THEN 1 ELSE 0 END), 0) AS ble,
               COALESCE(SUM(CASE WHEN l.radio_class = 'B' THEN 1 ELSE 0 END), 0) AS bluetooth,
               COALESCE(SUM(CASE WHEN l.radio_class = 'L' THEN 1 ELSE 0 END), 0) AS lte,
               COALESCE(SUM(CASE WHEN l.radio_class = 'N' THEN 1 ELSE 0 END), 0) AS nr,
               COALESCE(SUM(CASE WHEN l.radio_class = 'G' THEN 1 ELSE 0 END), 0) AS gsm,
               COALESCE(SUM(CASE WHEN l.radio_class = '?' THEN 1 ELSE 0 END), 0) AS unknown
        FROM filtered_networks n
        JOIN obs_latest l ON l.bssid = n.bssid"#,
        prefix = pipeline.cte_prefix(),
    );
    pipeline.finish(sql)
}

/// Emitter counts per threat level.
pub fn compile_severity_counts(
    filters: &FilterSpec,
    enabled: &EnabledSet,
    options: &CompileOptions,
) -> CompiledQuery {
    let pipeline = Pipeline::build(filters, enabled, PipelineMode::Networks, options);
    let sql = format!(
        r#"{prefix}
        SELECT COALESCE(SUM(CASE WHEN n.threat_level = 'CRITICAL' THEN 1 ELSE 0 END), 0) AS critical,
               COALESCE(SUM(CASE WHEN n.threat_level = 'HIGH' THEN 1 ELSE 0 END), 0) AS high,
               COALESCE(SUM(CASE WHEN n.threat_level = 'MED' THEN 1 ELSE 0 END), 0) AS medium,
               COALESCE(SUM(CASE WHEN n.threat_level = 'LOW' THEN 1 ELSE 0 END), 0) AS low,
               COALESCE(SUM(CASE WHEN n.threat_level = 'NONE' THEN 1 ELSE 0 END), 0) AS none
        FROM filtered_networks n"#,
        prefix = pipeline.cte_prefix(),
    );
    pipeline.finish(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterValue;

    #[test]
    fn test_bundle_has_eight_statements_sharing_params() {
        let filters = FilterSpec::new().with(FilterKey::ThreatScoreMin, 40.0);
        let enabled = EnabledSet::new().enable(FilterKey::ThreatScoreMin);

        let bundle = compile_analytics(&filters, &enabled, &CompileOptions::default());

        assert_eq!(bundle.statements.len(), 8);
        assert_eq!(bundle.params, vec![SqlParam::Real(40.0)]);
        assert_eq!(bundle.applied_filters, vec![FilterKey::ThreatScoreMin]);
        for (_, sql) in &bundle.statements {
            assert!(sql.contains("COALESCE(ta.score, 0) >= ?1"));
        }
    }

    #[test]
    fn test_severity_counts_use_the_same_pipeline() {
        let filters = FilterSpec::new().with(FilterKey::RadioTypes, FilterValue::set(["W", "E"]));
        let enabled = EnabledSet::new().enable(FilterKey::RadioTypes);

        let severity = compile_severity_counts(&filters, &enabled, &CompileOptions::default());
        let metrics = compile_dashboard_metrics(&filters, &enabled, &CompileOptions::default());

        assert_eq!(severity.params, metrics.params);
        assert_eq!(severity.applied_filters, vec![FilterKey::RadioTypes]);
        assert!(severity.sql.contains("AS critical"));
        assert!(metrics.sql.contains("AS wifi"));
    }
}
