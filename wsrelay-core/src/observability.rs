//! Logging, tracing and metrics bootstrap
//!
//! Every wsrelay process logs through `tracing`. This module installs the
//! subscriber that turns those events into output and, when a collector is
//! configured, exports spans and metrics over OTLP/gRPC.
//!
//! # Pipeline
//!
//! 1. **EnvFilter**: the configured `log_level` directives
//! 2. **fmt layer**: JSON lines (default) or human-readable text on stdout
//! 3. **OpenTelemetry layer**: only with an OTLP endpoint; turns spans into OTLP spans
//! 4. **Meter provider**: only with an OTLP endpoint; exports `wsrelay.server.*`
//!    instruments every 30 seconds
//!
//! Without an endpoint the OpenTelemetry globals keep their no-op providers,
//! so metric instruments cost next to nothing and nothing tries to connect to
//! a collector that isn't there.
//!
//! # Usage
//!
//! ```rust,no_run
//! use wsrelay_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("wsrelay")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("debug");
//!
//!     let _guard = wsrelay_core::init_observability(config).expect("Failed to init observability");
//!
//!     // ... run the relay; providers flush when `_guard` drops ...
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint; unset disables export
//! - `RUST_LOG`: Log level filter (e.g., "info", "wsrelay_server=debug")

use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::time::Duration;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Interval between metric exports
const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Observability configuration
///
/// # Defaults
///
/// - Service name: "wsrelay"
/// - Service version: Current crate version
/// - OTLP endpoint: From `OTEL_EXPORTER_OTLP_ENDPOINT`, otherwise none
/// - Traces and metrics: enabled exactly when an endpoint is known
/// - JSON logs: on
/// - Log level: From `RUST_LOG`, or "info"
///
/// # Examples
///
/// ```rust
/// use wsrelay_core::ObservabilityConfig;
///
/// let config = ObservabilityConfig::new("wsrelay")
///     .with_endpoint("http://collector:4317")
///     .with_log_level("debug")
///     .with_metrics(false);
///
/// assert!(config.enable_traces);
/// assert!(!config.enable_metrics);
/// ```
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to every span and metric
    pub service_name: String,

    /// Service version attached to every span and metric
    pub service_version: String,

    /// OTLP gRPC endpoint of the collector, if any
    pub otlp_endpoint: Option<String>,

    /// Export spans to the collector
    ///
    /// Has no effect without `otlp_endpoint`.
    pub enable_traces: bool,

    /// Export metrics to the collector
    ///
    /// Has no effect without `otlp_endpoint`.
    pub enable_metrics: bool,

    /// Write logs as JSON lines instead of human-readable text
    pub json_logs: bool,

    /// Log level filter used when `RUST_LOG` is not set
    ///
    /// Accepts any `EnvFilter` directive string: "warn",
    /// "info,wsrelay_server=debug", and so on.
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.is_empty());
        let export = otlp_endpoint.is_some();

        Self {
            service_name: "wsrelay".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint,
            enable_traces: export,
            enable_metrics: export,
            json_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl ObservabilityConfig {
    /// Create a new configuration with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint and turn on trace and metric export
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self.enable_traces = true;
        self.enable_metrics = true;
        self
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Enable or disable span export
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Enable or disable metric export
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Choose JSON (true) or plain text (false) log lines
    pub fn with_json_logs(mut self, enable: bool) -> Self {
        self.json_logs = enable;
        self
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Keeps the telemetry providers alive
///
/// Dropping the guard shuts the providers down, which flushes any spans and
/// metrics still buffered. Hold it for the lifetime of `main`.
#[must_use = "dropping the guard shuts down telemetry export"]
pub struct ObservabilityGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl ObservabilityGuard {
    /// Whether spans are being exported
    pub fn exports_traces(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Whether metrics are being exported
    pub fn exports_metrics(&self) -> bool {
        self.meter_provider.is_some()
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to shut down tracer provider");
            }
        }
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to shut down meter provider");
            }
        }
    }
}

/// Install the global subscriber and, if configured, the OTLP exporters
///
/// Call this **once** at start-up, before the server is built, so the
/// metric instruments the server creates attach to the real meter provider.
///
/// # Errors
///
/// - An invalid log level directive
/// - An exporter that cannot be constructed (e.g. a malformed endpoint)
/// - A global subscriber that was already installed
pub fn init_observability(
    config: ObservabilityConfig,
) -> Result<ObservabilityGuard, Box<dyn std::error::Error + Send + Sync>> {
    let endpoint = config.otlp_endpoint.clone();

    let tracer_provider = match &endpoint {
        Some(endpoint) if config.enable_traces => Some(init_tracer_provider(&config, endpoint)?),
        _ => None,
    };

    let meter_provider = match &endpoint {
        Some(endpoint) if config.enable_metrics => Some(init_meter_provider(&config, endpoint)?),
        _ => None,
    };

    init_tracing_subscriber(&config, tracer_provider.as_ref())?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = endpoint.as_deref().unwrap_or("none"),
        traces = tracer_provider.is_some(),
        metrics = meter_provider.is_some(),
        "Observability initialized"
    );

    Ok(ObservabilityGuard {
        tracer_provider,
        meter_provider,
    })
}

fn init_tracer_provider(
    config: &ObservabilityConfig,
    endpoint: &str,
) -> Result<SdkTracerProvider, Box<dyn std::error::Error + Send + Sync>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

fn init_meter_provider(
    config: &ObservabilityConfig,
    endpoint: &str,
) -> Result<SdkMeterProvider, Box<dyn std::error::Error + Send + Sync>> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider.clone());
    Ok(provider)
}

/// Build the level filter from the configured directives only
///
/// `RUST_LOG` is not read here. Callers fold it into `log_level` below any
/// command-line flag.
fn log_filter(config: &ObservabilityConfig) -> Result<EnvFilter, ParseError> {
    EnvFilter::try_new(&config.log_level)
}

fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer_provider: Option<&SdkTracerProvider>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use opentelemetry::trace::TracerProvider as _;

    let env_filter = log_filter(config)?;

    let telemetry_layer = tracer_provider.map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let (json_layer, text_layer) = if config.json_logs {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json();
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "wsrelay");
        assert!(config.json_logs);
        assert_eq!(config.enable_traces, config.otlp_endpoint.is_some());
        assert_eq!(config.enable_metrics, config.otlp_endpoint.is_some());
    }

    #[test]
    fn test_with_endpoint_enables_export() {
        let config = ObservabilityConfig::new("relay-test")
            .with_traces(false)
            .with_metrics(false)
            .with_endpoint("http://collector:4317");

        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4317"));
        assert!(config.enable_traces);
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_config_builder_chaining() {
        let config = ObservabilityConfig::new("relay-test")
            .with_endpoint("http://test:4317")
            .with_log_level("debug")
            .with_version("2.0.0")
            .with_metrics(false)
            .with_json_logs(false);

        assert_eq!(config.service_name, "relay-test");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.service_version, "2.0.0");
        assert!(config.enable_traces);
        assert!(!config.enable_metrics);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_config_log_levels() {
        for level in &["trace", "debug", "info", "warn", "error"] {
            let config = ObservabilityConfig::default().with_log_level(*level);
            assert_eq!(config.log_level, *level);
        }
    }

    #[test]
    fn test_log_filter_uses_configured_level() {
        std::env::set_var("RUST_LOG", "debug");

        let config = ObservabilityConfig::new("relay-test").with_log_level("warn");
        let filter = log_filter(&config).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));

        let config = config.with_log_level("info,wsrelay_server=trace");
        let filter = log_filter(&config).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        assert!(log_filter(&config.with_log_level("info,wsrelay=notalevel")).is_err());
    }

    #[test]
    fn test_init_without_collector() {
        std::env::set_var("RUST_LOG", "debug");
        let mut config = ObservabilityConfig::new("relay-test").with_log_level("warn");
        config.otlp_endpoint = None;

        let guard = init_observability(config).expect("subscriber should install");
        assert!(!guard.exports_traces());
        assert!(!guard.exports_metrics());

        // The configured level wins over RUST_LOG
        assert!(tracing::enabled!(tracing::Level::WARN));
        assert!(!tracing::enabled!(tracing::Level::DEBUG));

        // A second global subscriber is refused rather than panicking
        let again = init_observability(ObservabilityConfig::new("relay-test"));
        assert!(again.is_err());
    }
}
