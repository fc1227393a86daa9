//! Server metrics definitions
//!
//! OpenTelemetry instruments for the relay. They report through whatever
//! meter provider `wsrelay_core::init_observability` installed; without one
//! the global no-op provider swallows the measurements.
//!
//! # Metrics Collected
//!
//! - **wsrelay.server.connections.active**: open connections, by ingress (up-down counter)
//! - **wsrelay.server.connections.total**: connections accepted, by ingress (counter)
//! - **wsrelay.server.calls.total**: dispatched calls, by method and status (counter)
//! - **wsrelay.server.call.duration**: dispatch latency in seconds (histogram)
//! - **wsrelay.server.errors.total**: failures, by error kind (counter)
//!
//! The `ingress` attribute is `"gateway"` for WebSocket clients and
//! `"backend"` for the request/response socket.
//!
//! # Examples
//!
//! ```rust,no_run
//! use wsrelay_server::ServerMetrics;
//!
//! let metrics = ServerMetrics::new("wsrelay");
//! metrics.record_connection("gateway");
//! metrics.record_call("count", "success", 0.0004);
//! metrics.record_disconnection("gateway");
//! ```

use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, UpDownCounter},
    InstrumentationScope, KeyValue,
};

/// Ingress label for WebSocket client connections
pub const GATEWAY_INGRESS: &str = "gateway";

/// Ingress label for backend socket connections
pub const BACKEND_INGRESS: &str = "backend";

/// Server metrics for monitoring
///
/// All instruments are prefixed with `wsrelay.server.*`.
pub struct ServerMetrics {
    /// Number of open connections
    pub connections_active: UpDownCounter<i64>,
    /// Total number of connections accepted
    pub connections_total: Counter<u64>,
    /// Total number of calls dispatched
    pub calls_total: Counter<u64>,
    /// Dispatch duration in seconds
    pub call_duration: Histogram<f64>,
    /// Total number of errors
    pub errors_total: Counter<u64>,
}

impl ServerMetrics {
    /// Create a new ServerMetrics instance on the global meter provider
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into())
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    /// Create a new ServerMetrics instance with a custom meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connections_active: meter
                .i64_up_down_counter("wsrelay.server.connections.active")
                .with_description("Number of open client and backend connections")
                .build(),
            connections_total: meter
                .u64_counter("wsrelay.server.connections.total")
                .with_description("Total number of connections accepted")
                .build(),
            calls_total: meter
                .u64_counter("wsrelay.server.calls.total")
                .with_description("Total number of calls dispatched")
                .build(),
            call_duration: meter
                .f64_histogram("wsrelay.server.call.duration")
                .with_description("Call dispatch duration in seconds")
                .with_unit("s")
                .build(),
            errors_total: meter
                .u64_counter("wsrelay.server.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
        }
    }

    /// Record a newly accepted connection
    pub fn record_connection(&self, ingress: &'static str) {
        let attributes = &[KeyValue::new("ingress", ingress)];
        self.connections_active.add(1, attributes);
        self.connections_total.add(1, attributes);
    }

    /// Record a closed connection
    pub fn record_disconnection(&self, ingress: &'static str) {
        self.connections_active
            .add(-1, &[KeyValue::new("ingress", ingress)]);
    }

    /// Record a dispatched call
    pub fn record_call(&self, method: &str, status: &'static str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status),
        ];
        self.calls_total.add(1, attributes);
        self.call_duration.record(duration_secs, attributes);
    }

    /// Record an error by kind
    pub fn record_error(&self, kind: &'static str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", kind)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ServerMetrics::new("test-server");

        metrics.record_connection(GATEWAY_INGRESS);
        metrics.record_call("count", "success", 0.1);
        metrics.record_error("invalid_params");
        metrics.record_disconnection(GATEWAY_INGRESS);
    }

    #[test]
    fn test_connection_metrics_per_ingress() {
        let metrics = ServerMetrics::new("test-server-conn");

        metrics.record_connection(GATEWAY_INGRESS);
        metrics.record_connection(BACKEND_INGRESS);
        metrics.record_connection(GATEWAY_INGRESS);

        metrics.record_disconnection(GATEWAY_INGRESS);
        metrics.record_disconnection(BACKEND_INGRESS);
        metrics.record_disconnection(GATEWAY_INGRESS);
    }

    #[test]
    fn test_call_metrics() {
        let metrics = ServerMetrics::new("test-server-calls");

        metrics.record_call("count", "success", 0.05);
        metrics.record_call("count", "error", 0.01);
        metrics.record_call("unknown", "error", 0.0);

        metrics.record_error("unknown_method");
        metrics.record_error("panicked");
    }
}
