//! Prometheus metrics for the reservation engine.
//!
//! Metric families:
//! - Reservation transitions (created, canceled, rejected by reason)
//! - Capacity resizes
//! - Transaction latency per operation
//! - Cache invalidation failures
//! - Storage retries
//!
//! Recording is always safe: without an installed recorder the `metrics`
//! macros are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventbook_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves rendered metrics over HTTP.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions, install the Prometheus recorder and serve
    /// `/metrics` on the configured address.
    ///
    /// Must be called from within a Tokio runtime; the HTTP exporter is spawned
    /// onto it.
    ///
    /// # Errors
    ///
    /// Returns error if there is no current runtime, the address cannot be bound,
    /// or the exporter cannot be installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs a
    /// warning and succeeds without a handle or listener.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MetricsError::Install(format!("no Tokio runtime: {e}")))?;

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }
        register_metrics();

        let addr = self.addr;
        runtime.spawn(async move {
            // ExporterError implements neither Display nor Debug in metrics-exporter-prometheus 0.15.
            if exporter.await.is_err() {
                tracing::error!(addr = %addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics exporter listening - scrape at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Address the server was configured with
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "reservations_created_total",
        "Total number of confirmed reservations created"
    );
    describe_counter!(
        "reservations_canceled_total",
        "Total number of reservations canceled"
    );
    describe_counter!(
        "reservations_rejected_total",
        "Total number of reservation operations rejected, by reason"
    );
    describe_counter!(
        "capacity_resized_total",
        "Total number of successful capacity changes"
    );
    describe_histogram!(
        "reservation_transaction_duration_seconds",
        "Time taken by a reservation transaction, including retries"
    );

    describe_counter!(
        "cache_invalidation_failures_total",
        "Total number of failed cache invalidations"
    );

    describe_counter!(
        "storage_retries_total",
        "Total number of transaction retries after transient storage failures"
    );
    describe_counter!(
        "storage_retry_successes_total",
        "Total number of transactions that succeeded after retrying"
    );
    describe_counter!(
        "storage_retries_exhausted_total",
        "Total number of transactions that failed after exhausting retries"
    );
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a created reservation.
    pub fn record_created() {
        counter!("reservations_created_total").increment(1);
    }

    /// Record a canceled reservation.
    pub fn record_canceled() {
        counter!("reservations_canceled_total").increment(1);
    }

    /// Record a rejected operation.
    pub fn record_rejected(reason: &'static str) {
        counter!("reservations_rejected_total", "reason" => reason).increment(1);
    }

    /// Record a capacity change.
    pub fn record_resized() {
        counter!("capacity_resized_total").increment(1);
    }

    /// Record how long an operation's transaction took.
    pub fn record_duration(operation: &'static str, duration: Duration) {
        histogram!("reservation_transaction_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }
}

/// Cache coherence metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a failed invalidation.
    pub fn record_failure() {
        counter!("cache_invalidation_failures_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("storage_retries_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("storage_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("storage_retries_exhausted_total").increment(1);
    }
}
