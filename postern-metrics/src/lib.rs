//! OpenTelemetry metrics for the postern mail container.
//!
//! Instruments are pushed over OTLP/HTTP to a collector:
//!
//! ```text
//! postern → OTLP/HTTP → OpenTelemetry Collector → Prometheus (scrape)
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use postern_metrics::{init_metrics, MetricsConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! init_metrics(&MetricsConfig::default())?;
//!
//! if let Some(metrics) = postern_metrics::metrics() {
//!     metrics.spooler.record_started();
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod exporter;
mod processor;
mod spooler;

pub use config::MetricsConfig;
pub use error::MetricsError;
use once_cell::sync::OnceCell;
pub use processor::ProcessorMetrics;
pub use spooler::{SpoolerMetrics, SpoolerOutcome};

static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

/// Root metrics container
#[derive(Debug)]
pub struct Metrics {
    pub spooler: SpoolerMetrics,
    pub processor: ProcessorMetrics,
}

/// Initialize the metrics system. A no-op when metrics are disabled.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or if called more than once.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        tracing::info!("Metrics collection is disabled");
        return Ok(());
    }

    tracing::info!(
        endpoint = %config.endpoint,
        "Initializing OpenTelemetry metrics with OTLP exporter"
    );

    let provider = exporter::init_otlp_exporter(config)?;
    opentelemetry::global::set_meter_provider(provider);

    let metrics = Metrics {
        spooler: SpoolerMetrics::new(),
        processor: ProcessorMetrics::new(),
    };

    METRICS_INSTANCE
        .set(metrics)
        .map_err(|_| MetricsError::AlreadyInitialized)?;

    tracing::info!("Metrics collection initialized successfully");

    Ok(())
}

/// The global metrics instance, if `init_metrics` enabled it.
#[must_use]
pub fn metrics() -> Option<&'static Metrics> {
    METRICS_INSTANCE.get()
}

#[must_use]
pub fn is_enabled() -> bool {
    METRICS_INSTANCE.get().is_some()
}
