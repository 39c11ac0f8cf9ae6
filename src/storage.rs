//! SQLite storage layer for emitterscope.
//!
//! # Schema
//!
//! - `emitters`: one row per BSSID with the latest scan metadata
//! - `observations`: every sighting, timestamps in unix seconds
//! - `threat_assessments`: the external scorer's verdict per BSSID
//! - `location_markers`: operator markers; the newest `home` marker is home
//!
//! BSSIDs are stored upper-cased. Compiled queries from [`crate::compiler`]
//! run here unchanged; this module only binds parameters and decodes rows.

use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use thiserror::Error;
use tracing::{info, warn};

use crate::compiler::{AnalyticsQueries, AnalyticsStatement, CompiledQuery, SqlParam};
use crate::model::{
    AnalyticsBundle, BucketCount, DailyLabelCount, DashboardMetrics, Emitter, FeatureProperties,
    GeoFeature, HomeLocation, LabelCount, NetworkRow, Observation, ObservationRow, RadioBreakdown,
    SeverityCounts, THREAT_LEVEL_NONE, ThreatAssessment, ThreatTrendPoint, TopNetwork,
};
use crate::transparency;

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default budget for the whole analytics bundle.
pub const DEFAULT_ANALYTICS_TIMEOUT: Duration = Duration::from_secs(10);

const HOME_MARKER: &str = "home";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(
        "analytics timeout: queries did not finish within {}ms, narrow the time window",
        .0.as_millis()
    )]
    AnalyticsTimeout(Duration),

    #[error("failed to encode {0}: {1}")]
    Encode(&'static str, serde_json::Error),
}

/// One page of the list shape.
#[derive(Debug, Clone)]
pub struct NetworkPage {
    pub rows: Vec<NetworkRow>,
    /// `COUNT(*) OVER ()` of the page query; `None` when the page is empty.
    pub window_total: Option<i64>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    analytics_timeout: Duration,
}

impl Storage {
    /// Create a new storage instance with default pool settings and
    /// initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:emitterscope.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::connect(database_url, DEFAULT_MAX_CONNECTIONS, DEFAULT_ANALYTICS_TIMEOUT).await
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        analytics_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self {
            pool,
            analytics_timeout,
        };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Same pool, different analytics budget.
    pub fn with_analytics_timeout(mut self, analytics_timeout: Duration) -> Self {
        self.analytics_timeout = analytics_timeout;
        self
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS emitters (
                bssid TEXT PRIMARY KEY,
                ssid TEXT,
                radio_type TEXT,
                frequency INTEGER,
                capabilities TEXT,
                manufacturer TEXT,
                first_seen INTEGER,
                last_seen INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bssid TEXT NOT NULL,
                ssid TEXT,
                lat REAL,
                lon REAL,
                level INTEGER,
                accuracy REAL,
                time INTEGER NOT NULL,
                radio_type TEXT,
                radio_frequency INTEGER,
                radio_capabilities TEXT,
                altitude REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Per-emitter rollups and latest-row lookups scan by (bssid, time)
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_observations_bssid_time
            ON observations(bssid, time)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threat_assessments (
                bssid TEXT PRIMARY KEY,
                score REAL NOT NULL,
                level TEXT NOT NULL,
                flags TEXT NOT NULL DEFAULT '[]',
                signals TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS location_markers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                marker_type TEXT NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Insert or replace the metadata of one emitter.
    pub async fn upsert_emitter(&self, emitter: &Emitter) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO emitters (bssid, ssid, radio_type, frequency, capabilities, manufacturer, first_seen, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bssid) DO UPDATE SET
                ssid = excluded.ssid,
                radio_type = excluded.radio_type,
                frequency = excluded.frequency,
                capabilities = excluded.capabilities,
                manufacturer = excluded.manufacturer,
                first_seen = excluded.first_seen,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(emitter.bssid.to_uppercase())
        .bind(&emitter.ssid)
        .bind(&emitter.radio_type)
        .bind(emitter.frequency)
        .bind(&emitter.capabilities)
        .bind(&emitter.manufacturer)
        .bind(emitter.first_seen.map(|t| t.timestamp()))
        .bind(emitter.last_seen.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record one sighting. Returns the new observation id.
    pub async fn insert_observation(&self, observation: &Observation) -> Result<i64, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO observations
                (bssid, ssid, lat, lon, level, accuracy, time, radio_type, radio_frequency, radio_capabilities, altitude)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(observation.bssid.to_uppercase())
        .bind(&observation.ssid)
        .bind(observation.lat)
        .bind(observation.lon)
        .bind(observation.level)
        .bind(observation.accuracy)
        .bind(observation.time.timestamp())
        .bind(&observation.radio_type)
        .bind(observation.radio_frequency)
        .bind(&observation.radio_capabilities)
        .bind(observation.altitude)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Store the scorer's verdict for one emitter.
    pub async fn upsert_threat(
        &self,
        bssid: &str,
        assessment: &ThreatAssessment,
    ) -> Result<(), StorageError> {
        let flags = serde_json::to_string(&assessment.flags)
            .map_err(|e| StorageError::Encode("threat flags", e))?;
        let signals = serde_json::to_string(&assessment.signals)
            .map_err(|e| StorageError::Encode("threat signals", e))?;

        sqlx::query(
            r#"
            INSERT INTO threat_assessments (bssid, score, level, flags, signals)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(bssid) DO UPDATE SET
                score = excluded.score,
                level = excluded.level,
                flags = excluded.flags,
                signals = excluded.signals
            "#,
        )
        .bind(bssid.to_uppercase())
        .bind(assessment.score)
        .bind(assessment.level.trim().to_uppercase())
        .bind(flags)
        .bind(signals)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Add a `home` marker. The newest one wins.
    pub async fn set_home_location(&self, home: HomeLocation) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO location_markers (marker_type, lat, lon, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(HOME_MARKER)
        .bind(home.lat)
        .bind(home.lon)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The latest `home` marker, if any.
    pub async fn home_location(&self) -> Result<Option<HomeLocation>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT lat, lon
            FROM location_markers
            WHERE marker_type = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(HOME_MARKER)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(HomeLocation {
            lat: row.try_get("lat")?,
            lon: row.try_get("lon")?,
        }))
    }

    // ------------------------------------------------------------------
    // Compiled queries
    // ------------------------------------------------------------------

    /// Run a `List` query.
    pub async fn fetch_networks(&self, query: &CompiledQuery) -> Result<NetworkPage, StorageError> {
        let rows = bind_params(sqlx::query(&query.sql), &query.params)
            .fetch_all(&self.pool)
            .await?;

        let window_total = match rows.first() {
            Some(row) => Some(row.try_get("window_total")?),
            None => None,
        };
        let rows = rows
            .iter()
            .map(decode_network)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NetworkPage { rows, window_total })
    }

    /// Run a `Count` or `ObservationCount` query.
    pub async fn fetch_count(&self, query: &CompiledQuery) -> Result<i64, StorageError> {
        let row = bind_params(sqlx::query(&query.sql), &query.params)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    /// Run a `Geospatial` query. Returns at most `limit` features and whether
    /// more matched.
    pub async fn fetch_features(
        &self,
        query: &CompiledQuery,
        limit: u32,
    ) -> Result<(Vec<GeoFeature>, bool), StorageError> {
        let rows = bind_params(sqlx::query(&query.sql), &query.params)
            .fetch_all(&self.pool)
            .await?;

        let limit = limit as usize;
        let truncated = rows.len() > limit;
        let mut features = Vec::with_capacity(rows.len().min(limit));
        for row in rows.iter().take(limit) {
            let (Some(lat), Some(lon)) = (row.try_get::<Option<f64>, _>("lat")?, row.try_get::<Option<f64>, _>("lon")?) else {
                continue;
            };
            let bssid: String = row.try_get("bssid")?;
            let threat_score: Option<f64> = row.try_get("threat_score")?;
            let threat_level = normalize_level(row.try_get("threat_level")?);
            let explanation = decode_assessment(row, &bssid, threat_score, &threat_level)?
                .map(|assessment| transparency::explain(&assessment))
                .unwrap_or_default();

            let properties = FeatureProperties {
                id: row.try_get("id")?,
                ssid: row.try_get("ssid")?,
                signal: row.try_get("signal")?,
                accuracy: row.try_get("accuracy")?,
                observed_at: timestamp(row, "observed_at")?,
                radio_type: row.try_get("radio_type")?,
                security: row.try_get("security")?,
                frequency: row.try_get("frequency")?,
                threat_score,
                threat_level,
                threat_reasons: explanation.reasons,
                threat_evidence: explanation.evidence,
                threat_transparency_error: explanation.transparency_error,
                bssid,
            };
            features.push(GeoFeature::point(lat, lon, properties));
        }

        Ok((features, truncated))
    }

    /// Run an `Observations` query.
    pub async fn fetch_observations(
        &self,
        query: &CompiledQuery,
    ) -> Result<Vec<ObservationRow>, StorageError> {
        let rows = bind_params(sqlx::query(&query.sql), &query.params)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ObservationRow {
                    id: row.try_get("id")?,
                    bssid: row.try_get("bssid")?,
                    ssid: row.try_get("ssid")?,
                    lat: row.try_get("lat")?,
                    lon: row.try_get("lon")?,
                    signal: row.try_get("signal")?,
                    accuracy: row.try_get("accuracy")?,
                    altitude: row.try_get("altitude")?,
                    observed_at: timestamp(row, "observed_at")?,
                    radio_type: row.try_get("radio_type")?,
                    frequency: row.try_get("frequency")?,
                    capabilities: row.try_get("capabilities")?,
                })
            })
            .collect()
    }

    pub async fn fetch_dashboard_metrics(
        &self,
        query: &CompiledQuery,
    ) -> Result<DashboardMetrics, StorageError> {
        let row = bind_params(sqlx::query(&query.sql), &query.params)
            .fetch_one(&self.pool)
            .await?;

        Ok(DashboardMetrics {
            networks: row.try_get("networks")?,
            observations: row.try_get("observations")?,
            by_radio: RadioBreakdown {
                wifi: row.try_get("wifi")?,
                ble: row.try_get("ble")?,
                bluetooth: row.try_get("bluetooth")?,
                lte: row.try_get("lte")?,
                nr: row.try_get("nr")?,
                gsm: row.try_get("gsm")?,
                unknown: row.try_get("unknown")?,
            },
        })
    }

    pub async fn fetch_severity_counts(
        &self,
        query: &CompiledQuery,
    ) -> Result<SeverityCounts, StorageError> {
        let row = bind_params(sqlx::query(&query.sql), &query.params)
            .fetch_one(&self.pool)
            .await?;

        Ok(SeverityCounts {
            critical: row.try_get("critical")?,
            high: row.try_get("high")?,
            medium: row.try_get("medium")?,
            low: row.try_get("low")?,
            none: row.try_get("none")?,
        })
    }

    /// Run the analytics bundle in one transaction under the analytics
    /// timeout. On expiry the transaction is dropped, which rolls it back,
    /// and no partial bundle is returned.
    ///
    /// SQLite has no server-side statement timeout. Dropping the future stops
    /// the bundle between statements, but the statement already handed to the
    /// connection's worker thread runs to completion and keeps that pooled
    /// connection busy until it does.
    pub async fn run_analytics(
        &self,
        queries: &AnalyticsQueries,
    ) -> Result<AnalyticsBundle, StorageError> {
        let started = Instant::now();

        match tokio::time::timeout(self.analytics_timeout, self.analytics_transaction(queries)).await
        {
            Ok(result) => {
                if result.is_ok() {
                    info!(
                        statements = queries.statements.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Analytics bundle completed"
                    );
                }
                result
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.analytics_timeout.as_millis() as u64,
                    connection_held_until_statement_ends = true,
                    "Analytics bundle timed out, transaction rolled back"
                );
                Err(StorageError::AnalyticsTimeout(self.analytics_timeout))
            }
        }
    }

    async fn analytics_transaction(
        &self,
        queries: &AnalyticsQueries,
    ) -> Result<AnalyticsBundle, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut bundle = AnalyticsBundle::default();

        for (statement, sql) in &queries.statements {
            run_statement(&mut tx, *statement, sql, &queries.params, &mut bundle).await?;
        }

        tx.commit().await?;
        Ok(bundle)
    }
}

async fn run_statement(
    conn: &mut SqliteConnection,
    statement: AnalyticsStatement,
    sql: &str,
    params: &[SqlParam],
    bundle: &mut AnalyticsBundle,
) -> Result<(), StorageError> {
    let rows = bind_params(sqlx::query(sql), params)
        .fetch_all(&mut *conn)
        .await?;

    match statement {
        AnalyticsStatement::NetworkTypes => bundle.network_types = label_counts(&rows)?,
        AnalyticsStatement::SignalStrength => bundle.signal_strength = bucket_counts(&rows)?,
        AnalyticsStatement::Security => bundle.security = label_counts(&rows)?,
        AnalyticsStatement::ThreatDistribution => bundle.threat_distribution = label_counts(&rows)?,
        AnalyticsStatement::HourlyActivity => bundle.hourly_activity = bucket_counts(&rows)?,
        AnalyticsStatement::RadioTypesOverTime => {
            bundle.radio_types_over_time = rows
                .iter()
                .map(|row| {
                    Ok(DailyLabelCount {
                        day: row.try_get("day")?,
                        label: row.try_get("label")?,
                        count: row.try_get("count")?,
                    })
                })
                .collect::<Result<_, sqlx::Error>>()?;
        }
        AnalyticsStatement::ThreatTrends => {
            bundle.threat_trends = rows
                .iter()
                .map(|row| {
                    Ok(ThreatTrendPoint {
                        day: row.try_get("day")?,
                        avg_score: row.try_get("avg_score")?,
                        flagged: row.try_get("flagged")?,
                        total: row.try_get("total")?,
                    })
                })
                .collect::<Result<_, sqlx::Error>>()?;
        }
        AnalyticsStatement::TopNetworks => {
            bundle.top_networks = rows
                .iter()
                .map(|row| {
                    Ok(TopNetwork {
                        bssid: row.try_get("bssid")?,
                        ssid: row.try_get("ssid")?,
                        observations: row.try_get("observation_count")?,
                        threat_score: row.try_get("threat_score")?,
                        threat_level: row.try_get("threat_level")?,
                    })
                })
                .collect::<Result<_, sqlx::Error>>()?;
        }
    }

    Ok(())
}

/// Bind compiled parameters in order; `?N` placeholders refer to them by
/// position.
fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Int(value) => query.bind(*value),
            SqlParam::Real(value) => query.bind(*value),
            SqlParam::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let seconds: Option<i64> = row.try_get(column)?;
    Ok(seconds.and_then(|s| Utc.timestamp_opt(s, 0).single()))
}

/// Scorer JSON that fails to decode is treated as empty.
fn decode_json_list<T: DeserializeOwned>(raw: Option<String>, bssid: &str, column: &str) -> Vec<T> {
    let Some(text) = raw else {
        return Vec::new();
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(bssid, column, error = %e, "Malformed threat JSON, treating as empty");
        Vec::new()
    })
}

/// Stored levels from older scorer runs may be lower-case or blank.
fn normalize_level(level: Option<String>) -> String {
    match level.as_deref().map(str::trim) {
        None | Some("") => THREAT_LEVEL_NONE.to_string(),
        Some(level) => level.to_uppercase(),
    }
}

/// Rebuild the scorer's assessment from the `threat_*` columns. Emitters
/// without a score were never assessed.
fn decode_assessment(
    row: &SqliteRow,
    bssid: &str,
    threat_score: Option<f64>,
    threat_level: &str,
) -> Result<Option<ThreatAssessment>, sqlx::Error> {
    let Some(score) = threat_score else {
        return Ok(None);
    };
    Ok(Some(ThreatAssessment {
        score,
        level: threat_level.to_string(),
        flags: decode_json_list(row.try_get("threat_flags")?, bssid, "flags"),
        signals: decode_json_list(row.try_get("threat_signals")?, bssid, "signals"),
    }))
}

fn decode_network(row: &SqliteRow) -> Result<NetworkRow, sqlx::Error> {
    let bssid: String = row.try_get("bssid")?;
    let threat_score: Option<f64> = row.try_get("threat_score")?;
    let threat_level = normalize_level(row.try_get("threat_level")?);
    let assessment = decode_assessment(row, &bssid, threat_score, &threat_level)?;

    Ok(NetworkRow {
        ssid: row.try_get("ssid")?,
        radio_type: row.try_get("radio_type")?,
        security: row.try_get("security")?,
        frequency: row.try_get("frequency")?,
        channel: row.try_get("channel")?,
        capabilities: row.try_get("capabilities")?,
        manufacturer: row.try_get("manufacturer")?,
        signal: row.try_get("signal")?,
        lat: row.try_get("lat")?,
        lon: row.try_get("lon")?,
        accuracy: row.try_get("accuracy")?,
        observed_at: timestamp(row, "observed_at")?,
        first_seen: timestamp(row, "first_seen")?,
        last_seen: timestamp(row, "last_seen")?,
        observations: row.try_get("observation_count")?,
        first_observed_at: timestamp(row, "first_observed")?,
        last_observed_at: timestamp(row, "last_observed")?,
        avg_signal: row.try_get("avg_signal")?,
        min_signal: row.try_get("min_signal")?,
        max_signal: row.try_get("max_signal")?,
        stationary_confidence: row.try_get("stationary_confidence")?,
        threat_score,
        threat_level,
        threat_reasons: Vec::new(),
        threat_evidence: Vec::new(),
        threat_transparency_error: false,
        assessment,
        bssid,
    })
}

fn label_counts(rows: &[SqliteRow]) -> Result<Vec<LabelCount>, sqlx::Error> {
    rows.iter()
        .map(|row| {
            Ok(LabelCount {
                label: row.try_get("label")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}

fn bucket_counts(rows: &[SqliteRow]) -> Result<Vec<BucketCount>, sqlx::Error> {
    rows.iter()
        .map(|row| {
            Ok(BucketCount {
                bucket: row.try_get("bucket")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}
