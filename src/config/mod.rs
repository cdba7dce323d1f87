use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_aggregate_timeout_ms")]
    pub aggregate_timeout_ms: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default)]
    pub telemetry_enabled: bool,
    #[serde(default = "default_telemetry_service_name")]
    pub telemetry_service_name: String,
    #[serde(default = "default_telemetry_service_version")]
    pub telemetry_service_version: String,
    #[serde(default = "default_telemetry_environment")]
    pub telemetry_environment: String,
    #[serde(default = "default_telemetry_otlp_endpoint")]
    pub telemetry_otlp_endpoint: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_aggregate_timeout_ms() -> u64 {
    2000
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_telemetry_service_name() -> String {
    "solo-spots-ratings".to_string()
}

fn default_telemetry_service_version() -> String {
    "1.0.0".to_string()
}

fn default_telemetry_environment() -> String {
    "production".to_string()
}

fn default_telemetry_otlp_endpoint() -> String {
    "http://otel-collector.observability.svc.cluster.local:4317".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(Environment::default())
    }

    fn from_source(source: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("database_max_connections", 5)?
            .add_source(source)
            .build()?
            .try_deserialize()
    }

    pub fn aggregate_timeout(&self) -> Duration {
        Duration::from_millis(self.aggregate_timeout_ms)
    }

    /// Never zero; `tokio::time::interval` rejects that.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().source(Some(map))
    }

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_source(env(&[
            ("DATABASE_URL", "postgres://localhost/spots"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.aggregate_timeout(), Duration::from_secs(2));
        assert_eq!(config.reconcile_interval(), Duration::from_secs(300));
        assert!(!config.telemetry_enabled);
    }

    #[test]
    fn test_overrides_parsed() {
        let config = AppConfig::from_source(env(&[
            ("DATABASE_URL", "postgres://localhost/spots"),
            ("JWT_SECRET", "secret"),
            ("AGGREGATE_TIMEOUT_MS", "250"),
            ("RECONCILE_INTERVAL_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.aggregate_timeout(), Duration::from_millis(250));
        assert_eq!(config.reconcile_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_database_url_fails() {
        let result = AppConfig::from_source(env(&[("JWT_SECRET", "secret")]));
        assert!(result.is_err());
    }
}
