//! Filter compiler.
//!
//! Compiles one validated `{filters, enabled}` pair into parameterized SQLite
//! statements for several result shapes. All shapes share the same CTE
//! chain, so a list page and its count can never disagree:
//!
//! ```text
//! obs_raw -> obs_base -> filtered_obs -> obs_rollup -> obs_spatial -> filtered_networks
//!                                    \-> obs_latest
//! ```
//!
//! Observation-level predicates land in `filtered_obs`, emitter-level ones
//! (threat, stationary confidence, observation count) in `filtered_networks`.
//!
//! # Explicit-only
//!
//! Keys are walked in vocabulary order and a key contributes SQL only when
//! its [`EnabledSet`] entry is `true`. Every enabled key ends up either in
//! `applied_filters` or in `ignored_filters` with a reason, and user values
//! only ever reach SQL as bound parameters.

mod analytics;
mod predicates;
mod shapes;
mod sql;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filters::{EnabledSet, FilterKey, FilterSpec};
use crate::model::HomeLocation;

pub use analytics::{
    AnalyticsQueries, AnalyticsStatement, compile_analytics, compile_dashboard_metrics,
    compile_severity_counts,
};
pub use shapes::{SortDirection, SortTerm, parse_sort};

use predicates::{Fragment, FragmentContext};

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        SqlParam::Real(value)
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

/// Collects parameters and hands out numbered `?N` placeholders.
#[derive(Debug, Default)]
pub(crate) struct ParamSink {
    params: Vec<SqlParam>,
}

impl ParamSink {
    pub(crate) fn push(&mut self, value: impl Into<SqlParam>) -> String {
        self.params.push(value.into());
        format!("?{}", self.params.len())
    }

    fn into_params(self) -> Vec<SqlParam> {
        self.params
    }
}

/// Result shape of a compiled statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryShape {
    /// One row per emitter, paginated.
    List,
    /// Total emitters matching the same pipeline as `List`.
    Count,
    /// One row per located observation, capped at the render budget.
    Geospatial,
    /// Raw observation rows of selected emitters, paginated.
    Observations,
    /// Total rows matching the same pipeline as `Observations`.
    ObservationCount,
}

impl QueryShape {
    /// Shapes whose rows are single sightings, where emitter aggregates
    /// cannot be evaluated.
    pub fn is_observation_rows(&self) -> bool {
        matches!(self, QueryShape::Observations | QueryShape::ObservationCount)
    }
}

/// Why an enabled filter contributed no predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    UnsupportedForShape,
    EnabledWithoutValue,
    HomeLocationMissing,
    RequiresTimeframe,
    OverriddenBySelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredFilter {
    pub key: FilterKey,
    pub reason: IgnoreReason,
}

impl IgnoredFilter {
    pub fn new(key: FilterKey, reason: IgnoreReason) -> Self {
        Self { key, reason }
    }
}

/// Which filters shaped a response, reported alongside the data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterTransparency {
    pub applied_filters: Vec<FilterKey>,
    pub ignored_filters: Vec<IgnoredFilter>,
    pub warnings: Vec<String>,
}

/// Request-scoped inputs that are not filter values.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Reference instant for relative time windows.
    pub now: DateTime<Utc>,
    pub home: Option<HomeLocation>,
    pub limit: u32,
    pub offset: u64,
    /// Upper-cased BSSIDs of an explicit selection.
    pub selection: Vec<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            home: None,
            limit: 500,
            offset: 0,
            selection: Vec::new(),
            sort: None,
            order: None,
        }
    }
}

/// One parameterized statement plus its transparency report.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub applied_filters: Vec<FilterKey>,
    pub ignored_filters: Vec<IgnoredFilter>,
    pub warnings: Vec<String>,
}

impl CompiledQuery {
    pub fn transparency(&self) -> FilterTransparency {
        FilterTransparency {
            applied_filters: self.applied_filters.clone(),
            ignored_filters: self.ignored_filters.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

/// How the predicate walk treats keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineMode {
    /// Emitter-level output: every key can apply.
    Networks,
    /// Per-observation output: emitter-level keys are unsupported and the
    /// selection restricts rows.
    ObservationRows,
    /// Map features: filters apply unless a selection overrides them.
    Geospatial,
}

impl From<QueryShape> for PipelineMode {
    fn from(shape: QueryShape) -> Self {
        match shape {
            QueryShape::List | QueryShape::Count => PipelineMode::Networks,
            QueryShape::Observations | QueryShape::ObservationCount => PipelineMode::ObservationRows,
            QueryShape::Geospatial => PipelineMode::Geospatial,
        }
    }
}

/// Predicates and bookkeeping collected for one request.
#[derive(Debug, Default)]
pub(crate) struct Pipeline {
    pub(crate) sink: ParamSink,
    obs_where: Vec<String>,
    network_where: Vec<String>,
    applied: Vec<FilterKey>,
    ignored: Vec<IgnoredFilter>,
    pub(crate) warnings: Vec<String>,
}

impl Pipeline {
    pub(crate) fn build(
        filters: &FilterSpec,
        enabled: &EnabledSet,
        mode: PipelineMode,
        options: &CompileOptions,
    ) -> Self {
        let mut pipeline = Pipeline::default();
        let overridden = mode == PipelineMode::Geospatial && !options.selection.is_empty();

        for key in FilterKey::ALL {
            if !enabled.is_enabled(key) {
                continue;
            }
            if overridden {
                pipeline
                    .ignored
                    .push(IgnoredFilter::new(key, IgnoreReason::OverriddenBySelection));
                continue;
            }
            if mode == PipelineMode::ObservationRows && key.is_emitter_level() {
                pipeline
                    .ignored
                    .push(IgnoredFilter::new(key, IgnoreReason::UnsupportedForShape));
                continue;
            }

            let fragment = {
                let mut ctx = FragmentContext {
                    filters,
                    enabled,
                    options,
                    sink: &mut pipeline.sink,
                    warnings: &mut pipeline.warnings,
                };
                predicates::fragment(key, &mut ctx)
            };

            match fragment {
                Fragment::Observation(sql) => {
                    pipeline.obs_where.push(sql);
                    pipeline.applied.push(key);
                }
                Fragment::Emitter(sql) => {
                    pipeline.network_where.push(sql);
                    pipeline.applied.push(key);
                }
                Fragment::Modifier => pipeline.applied.push(key),
                Fragment::Ignored(reason) => pipeline.ignored.push(IgnoredFilter::new(key, reason)),
            }
        }

        if mode != PipelineMode::Networks && !options.selection.is_empty() {
            let encoded = serde_json::to_string(&options.selection).unwrap_or_else(|_| "[]".into());
            let placeholder = pipeline.sink.push(encoded);
            pipeline
                .obs_where
                .push(format!("b.bssid IN (SELECT value FROM json_each({placeholder}))"));
        }

        pipeline
    }

    /// The shared `WITH ...` chain ending in `filtered_networks` and `obs_latest`.
    pub(crate) fn cte_prefix(&self) -> String {
        shapes::cte_prefix(&self.obs_where, &self.network_where)
    }

    pub(crate) fn finish(self, sql: String) -> CompiledQuery {
        CompiledQuery {
            sql,
            params: self.sink.into_params(),
            applied_filters: self.applied,
            ignored_filters: self.ignored,
            warnings: self.warnings,
        }
    }
}

/// Compile `{filters, enabled}` into a statement of the given shape.
pub fn compile(
    filters: &FilterSpec,
    enabled: &EnabledSet,
    shape: QueryShape,
    options: &CompileOptions,
) -> CompiledQuery {
    let mut pipeline = Pipeline::build(filters, enabled, shape.into(), options);
    let prefix = pipeline.cte_prefix();

    let sql = match shape {
        QueryShape::List => {
            let terms = parse_sort(
                options.sort.as_deref(),
                options.order.as_deref(),
                &mut pipeline.warnings,
            );
            let limit = pipeline.sink.push(i64::from(options.limit));
            let offset = pipeline.sink.push(clamp_offset(options.offset));
            shapes::list_sql(&prefix, &terms, &limit, &offset)
        }
        QueryShape::Count => shapes::count_sql(&prefix),
        QueryShape::Geospatial => {
            let limit = pipeline.sink.push(i64::from(options.limit) + 1);
            shapes::geospatial_sql(&prefix, &limit)
        }
        QueryShape::Observations => {
            let limit = pipeline.sink.push(i64::from(options.limit));
            let offset = pipeline.sink.push(clamp_offset(options.offset));
            shapes::observations_sql(&prefix, &limit, &offset)
        }
        QueryShape::ObservationCount => shapes::observation_count_sql(&prefix),
    };

    pipeline.finish(sql)
}

fn clamp_offset(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FilterValue, Timeframe};

    fn options() -> CompileOptions {
        CompileOptions {
            now: DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            ..CompileOptions::default()
        }
    }

    #[test]
    fn test_only_enabled_keys_compile() {
        let filters = FilterSpec::new()
            .with(FilterKey::RadioTypes, FilterValue::set(["W"]))
            .with(FilterKey::RssiMin, -70.0);
        let enabled = EnabledSet::new().enable(FilterKey::RadioTypes);

        let query = compile(&filters, &enabled, QueryShape::Count, &options());

        assert_eq!(query.applied_filters, vec![FilterKey::RadioTypes]);
        assert!(query.ignored_filters.is_empty());
        assert_eq!(query.params, vec![SqlParam::Text("W".into())]);
        assert!(query.sql.contains("b.radio_class IN (?1)"));
        assert!(!query.sql.contains("b.level >="));
    }

    #[test]
    fn test_disabled_key_matches_absent_key() {
        let populated = FilterSpec::new()
            .with(FilterKey::Ssid, FilterValue::text("corp"))
            .with(FilterKey::ThreatScoreMin, 50.0);
        let bare = FilterSpec::new().with(FilterKey::Ssid, FilterValue::text("corp"));

        let disabled = EnabledSet::new()
            .enable(FilterKey::Ssid)
            .disable(FilterKey::ThreatScoreMin);
        let omitted = EnabledSet::new().enable(FilterKey::Ssid);

        for shape in [QueryShape::List, QueryShape::Count, QueryShape::Geospatial] {
            let a = compile(&populated, &disabled, shape, &options());
            let b = compile(&bare, &omitted, shape, &options());
            assert_eq!(a, b, "{shape:?}");
        }
    }

    #[test]
    fn test_enabled_without_value_is_reported() {
        let enabled = EnabledSet::new()
            .enable(FilterKey::Ssid)
            .enable(FilterKey::EncryptionTypes);
        let query = compile(&FilterSpec::new(), &enabled, QueryShape::List, &options());

        assert!(query.applied_filters.is_empty());
        assert_eq!(
            query.ignored_filters,
            vec![
                IgnoredFilter::new(FilterKey::Ssid, IgnoreReason::EnabledWithoutValue),
                IgnoredFilter::new(FilterKey::EncryptionTypes, IgnoreReason::EnabledWithoutValue),
            ]
        );
    }

    #[test]
    fn test_count_params_are_a_prefix_of_list_params() {
        let filters = FilterSpec::new()
            .with(FilterKey::Ssid, FilterValue::text("lab"))
            .with(FilterKey::ThreatScoreMin, 20.0);
        let enabled = EnabledSet::new()
            .enable(FilterKey::Ssid)
            .enable(FilterKey::ThreatScoreMin);

        let list = compile(&filters, &enabled, QueryShape::List, &options());
        let count = compile(&filters, &enabled, QueryShape::Count, &options());

        assert_eq!(&list.params[..count.params.len()], count.params.as_slice());
        assert_eq!(list.params.len(), count.params.len() + 2);
        assert_eq!(list.applied_filters, count.applied_filters);
    }

    #[test]
    fn test_observation_rows_drop_emitter_level_keys() {
        let filters = FilterSpec::new()
            .with(FilterKey::ThreatScoreMin, 50.0)
            .with(FilterKey::RssiMin, -80.0);
        let enabled = EnabledSet::new()
            .enable(FilterKey::ThreatScoreMin)
            .enable(FilterKey::RssiMin);
        let opts = CompileOptions {
            selection: vec!["AA:BB:CC:DD:EE:FF".into()],
            ..options()
        };

        let query = compile(&filters, &enabled, QueryShape::Observations, &opts);

        assert_eq!(query.applied_filters, vec![FilterKey::RssiMin]);
        assert_eq!(
            query.ignored_filters,
            vec![IgnoredFilter::new(
                FilterKey::ThreatScoreMin,
                IgnoreReason::UnsupportedForShape
            )]
        );
        assert!(query.sql.contains("json_each("));
    }

    #[test]
    fn test_selection_overrides_geospatial_filters() {
        let filters = FilterSpec::new().with(FilterKey::RssiMin, -80.0);
        let enabled = EnabledSet::new()
            .enable(FilterKey::RssiMin)
            .enable(FilterKey::Ssid);
        let opts = CompileOptions {
            selection: vec!["AA:BB:CC:DD:EE:FF".into()],
            limit: 100,
            ..options()
        };

        let query = compile(&filters, &enabled, QueryShape::Geospatial, &opts);

        assert!(query.applied_filters.is_empty());
        assert!(
            query
                .ignored_filters
                .iter()
                .all(|ignored| ignored.reason == IgnoreReason::OverriddenBySelection)
        );
        assert_eq!(query.ignored_filters.len(), 2);
        assert_eq!(
            query.params,
            vec![
                SqlParam::Text("[\"AA:BB:CC:DD:EE:FF\"]".into()),
                SqlParam::Int(101)
            ]
        );
    }

    #[test]
    fn test_list_selection_is_not_a_predicate() {
        let opts = CompileOptions {
            selection: vec!["AA:BB:CC:DD:EE:FF".into()],
            ..options()
        };
        let query = compile(&FilterSpec::new(), &EnabledSet::new(), QueryShape::Count, &opts);
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_distance_without_home_is_ignored() {
        let filters = FilterSpec::new().with(FilterKey::DistanceFromHomeMax, 500.0);
        let enabled = EnabledSet::new().enable(FilterKey::DistanceFromHomeMax);

        let query = compile(&filters, &enabled, QueryShape::List, &options());
        assert_eq!(
            query.ignored_filters,
            vec![IgnoredFilter::new(
                FilterKey::DistanceFromHomeMax,
                IgnoreReason::HomeLocationMissing
            )]
        );

        let opts = CompileOptions {
            home: Some(HomeLocation { lat: 40.0, lon: -75.0 }),
            ..options()
        };
        let query = compile(&filters, &enabled, QueryShape::List, &opts);
        assert_eq!(query.applied_filters, vec![FilterKey::DistanceFromHomeMax]);
    }

    #[test]
    fn test_temporal_scope_needs_timeframe() {
        let filters = FilterSpec::new()
            .with(FilterKey::TemporalScope, FilterValue::text("network_lifetime"))
            .with(
                FilterKey::Timeframe,
                FilterValue::Timeframe(Timeframe::Relative {
                    window: "7d".parse().unwrap(),
                }),
            );

        let scope_only = EnabledSet::new().enable(FilterKey::TemporalScope);
        let query = compile(&filters, &scope_only, QueryShape::Count, &options());
        assert_eq!(
            query.ignored_filters,
            vec![IgnoredFilter::new(
                FilterKey::TemporalScope,
                IgnoreReason::RequiresTimeframe
            )]
        );

        let both = scope_only.enable(FilterKey::Timeframe);
        let query = compile(&filters, &both, QueryShape::Count, &options());
        assert_eq!(
            query.applied_filters,
            vec![FilterKey::Timeframe, FilterKey::TemporalScope]
        );
        assert!(query.sql.contains("b.last_seen >= ?1"));
        let cutoff = options().now.timestamp() - 7 * 86_400;
        assert_eq!(query.params, vec![SqlParam::Int(cutoff)]);
    }

    #[test]
    fn test_network_id_is_never_supported() {
        let filters = FilterSpec::new().with(FilterKey::NetworkId, FilterValue::text("x"));
        let enabled = EnabledSet::new().enable(FilterKey::NetworkId);
        let query = compile(&filters, &enabled, QueryShape::List, &options());
        assert_eq!(
            query.ignored_filters,
            vec![IgnoredFilter::new(
                FilterKey::NetworkId,
                IgnoreReason::UnsupportedForShape
            )]
        );
    }

    #[test]
    fn test_params_number_in_vocabulary_order() {
        let filters = FilterSpec::new()
            .with(FilterKey::ThreatScoreMax, 90.0)
            .with(FilterKey::Ssid, FilterValue::text("a"));
        let enabled = EnabledSet::new()
            .enable(FilterKey::ThreatScoreMax)
            .enable(FilterKey::Ssid);

        let query = compile(&filters, &enabled, QueryShape::Count, &options());
        assert_eq!(query.params[0], SqlParam::Text("%a%".into()));
        assert_eq!(query.params[1], SqlParam::Real(90.0));
    }
}
