//! Runtime configuration read from the environment once at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_PATH: &str = "sqlite:emitterscope.db?mode=rwc";

pub const DEFAULT_ANALYTICS_TIMEOUT_MS: u64 = 10_000;

/// Most observation points one geospatial response may carry.
pub const DEFAULT_RENDER_BUDGET: u32 = 500_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub analytics_timeout: Duration,
    pub render_budget: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DB_PATH.to_string(),
            max_connections: crate::storage::DEFAULT_MAX_CONNECTIONS,
            analytics_timeout: Duration::from_millis(DEFAULT_ANALYTICS_TIMEOUT_MS),
            render_budget: DEFAULT_RENDER_BUDGET,
        }
    }
}

impl Config {
    /// Load configuration from `EMITTERSCOPE_*` variables. Unset or
    /// unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            port: parse_var(&lookup, "EMITTERSCOPE_PORT").unwrap_or(defaults.port),
            database_url: lookup("EMITTERSCOPE_DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.database_url),
            max_connections: positive(parse_var(&lookup, "EMITTERSCOPE_MAX_CONNECTIONS"))
                .unwrap_or(defaults.max_connections),
            analytics_timeout: positive(parse_var(&lookup, "EMITTERSCOPE_ANALYTICS_TIMEOUT_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.analytics_timeout),
            render_budget: positive(parse_var(&lookup, "EMITTERSCOPE_RENDER_BUDGET"))
                .unwrap_or(defaults.render_budget),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|raw| raw.trim().parse().ok())
}

fn positive<T: PartialOrd + Default>(value: Option<T>) -> Option<T> {
    value.filter(|v| *v > T::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config(&[]), Config::default());
        assert_eq!(Config::default().render_budget, 500_000);
        assert_eq!(Config::default().analytics_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("EMITTERSCOPE_PORT", "8080"),
            ("EMITTERSCOPE_DATABASE_URL", "sqlite::memory:"),
            ("EMITTERSCOPE_ANALYTICS_TIMEOUT_MS", "250"),
            ("EMITTERSCOPE_RENDER_BUDGET", "1000"),
        ]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.analytics_timeout, Duration::from_millis(250));
        assert_eq!(cfg.render_budget, 1000);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let cfg = config(&[
            ("EMITTERSCOPE_PORT", "eighty"),
            ("EMITTERSCOPE_MAX_CONNECTIONS", "0"),
            ("EMITTERSCOPE_RENDER_BUDGET", "-5"),
        ]);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.render_budget, DEFAULT_RENDER_BUDGET);
    }
}
