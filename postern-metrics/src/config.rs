//! Metrics configuration

use serde::Deserialize;

/// Configuration for metrics collection and export
///
/// ```ron
/// metrics: (
///     enabled: true,
///     endpoint: "http://otel-collector:4318/v1/metrics",
///     export_interval_secs: 30,
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OTLP/HTTP endpoint metrics are pushed to.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// How often the periodic reader exports.
    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,
}

const fn default_enabled() -> bool {
    false
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".to_string()
}

const fn default_export_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            export_interval_secs: default_export_interval_secs(),
        }
    }
}
