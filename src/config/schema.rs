//! Settings schema.
//!
//! Every section defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root settings for the sync daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SyncSettings {
    /// Connection to the router's management endpoint.
    pub management: ManagementConfig,

    /// Where the desired router configuration lives.
    pub source: SourceConfig,

    /// Credential store and certificate output.
    pub credentials: CredentialsConfig,

    /// Reconciliation behaviour.
    pub reconcile: ReconcileConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Router endpoint, e.g. `amqp://127.0.0.1:5672`.
    pub url: String,

    /// Idle agents kept per endpoint.
    pub pool_capacity: usize,

    /// Deadline for one management request (or batch).
    pub request_timeout_secs: u64,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            url: "amqp://127.0.0.1:5672".to_string(),
            pool_capacity: 10,
            request_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    /// JSON file holding the desired-state key/value data.
    pub path: String,

    /// Key of the router document inside that data.
    pub config_key: String,

    /// Attempts for a read-modify-write that keeps conflicting.
    pub max_update_retries: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: "/etc/router-sync/desired.json".to_string(),
            config_key: "skrouterd.json".to_string(),
            max_update_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Directory with one subdirectory per credential.
    pub store_path: String,

    /// Directory the router reads certificates from.
    pub output_path: String,

    /// Profiles whose files are managed elsewhere.
    pub excluded_profiles: Vec<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            store_path: "/etc/router-sync/credentials".to_string(),
            output_path: "/etc/skupper-router-certs".to_string(),
            excluded_profiles: vec!["skupper-internal".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Connectors with this name prefix are never deleted.
    pub ignore_connector_prefix: String,

    /// Failed cycles retried with jittered backoff before slowing to minutes.
    pub fast_retries: u32,

    pub backoff_base_ms: u64,

    pub backoff_max_ms: u64,

    /// Cap for the slow retry delay.
    pub max_delay_mins: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            ignore_connector_prefix: "auto-mesh".to_string(),
            fast_retries: 5,
            backoff_base_ms: 5,
            backoff_max_ms: 1000,
            max_delay_mins: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings: SyncSettings = toml::from_str("").unwrap();
        assert_eq!(settings.management.url, "amqp://127.0.0.1:5672");
        assert_eq!(settings.management.pool_capacity, 10);
        assert_eq!(settings.source.config_key, "skrouterd.json");
        assert_eq!(settings.credentials.excluded_profiles, vec!["skupper-internal"]);
        assert_eq!(settings.reconcile.ignore_connector_prefix, "auto-mesh");
        assert!(!settings.observability.metrics_enabled);
    }

    #[test]
    fn test_partial_sections() {
        let settings: SyncSettings = toml::from_str(
            r#"
            [management]
            url = "amqp://router:5672"

            [reconcile]
            fast_retries = 3
            "#,
        )
        .unwrap();
        assert_eq!(settings.management.url, "amqp://router:5672");
        assert_eq!(settings.management.request_timeout_secs, 5);
        assert_eq!(settings.reconcile.fast_retries, 3);
        assert_eq!(settings.reconcile.max_delay_mins, 10);
    }
}
