/*!
Observability for stow: tracing subscriber setup and, with the `metrics`
feature, Prometheus instrumentation of store operations.
*/

#[cfg(feature = "metrics")]
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use std::time::Instant;
use tracing::debug;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry as TracingRegistry};

use crate::{Result, StowError};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<StowMetrics> = OnceLock::new();

/// Metrics collection for store operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct StowMetrics {
    pub operations_total: IntCounterVec,
    pub failures_total: IntCounterVec,
    pub history_rotations_total: IntCounter,
    pub latency_seconds: HistogramVec,
    pub object_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl StowMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();
        let metric_error = |name: &str, e: prometheus::Error| {
            StowError::storage(format!("Failed to create {name} metric: {e}"))
        };

        let operations_total = IntCounterVec::new(
            Opts::new("stow_operations_total", "Store operations attempted"),
            &["operation"],
        )
        .map_err(|e| metric_error("operations_total", e))?;

        let failures_total = IntCounterVec::new(
            Opts::new("stow_failures_total", "Store operations that failed"),
            &["operation", "kind"],
        )
        .map_err(|e| metric_error("failures_total", e))?;

        let history_rotations_total = IntCounter::new(
            "stow_history_rotations_total",
            "Previous versions moved into history before an overwrite",
        )
        .map_err(|e| metric_error("history_rotations_total", e))?;

        let latency_seconds = HistogramVec::new(
            HistogramOpts::new("stow_latency_seconds", "Duration of store operations in seconds"),
            &["operation"],
        )
        .map_err(|e| metric_error("latency_seconds", e))?;

        let object_size_bytes = Histogram::with_opts(
            HistogramOpts::new("stow_object_size_bytes", "Size of serialized objects in bytes")
                .buckets(prometheus::exponential_buckets(256.0, 4.0, 10).map_err(|e| {
                    metric_error("object_size_bytes", e)
                })?),
        )
        .map_err(|e| metric_error("object_size_bytes", e))?;

        registry
            .register(Box::new(operations_total.clone()))
            .and_then(|_| registry.register(Box::new(failures_total.clone())))
            .and_then(|_| registry.register(Box::new(history_rotations_total.clone())))
            .and_then(|_| registry.register(Box::new(latency_seconds.clone())))
            .and_then(|_| registry.register(Box::new(object_size_bytes.clone())))
            .map_err(|e| StowError::storage(format!("Failed to register metrics: {e}")))?;

        Ok(Self {
            operations_total,
            failures_total,
            history_rotations_total,
            latency_seconds,
            object_size_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    ///
    /// Returns `None` only if the collectors could not be registered.
    pub fn global() -> Option<&'static StowMetrics> {
        if let Some(metrics) = METRICS.get() {
            return Some(metrics);
        }
        match Self::new() {
            Ok(metrics) => Some(METRICS.get_or_init(|| metrics)),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics unavailable");
                None
            }
        }
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| StowError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| StowError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Times one store operation and reports its outcome
pub(crate) struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub(crate) fn start(operation: &'static str) -> Self {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = StowMetrics::global() {
            metrics.operations_total.with_label_values(&[operation]).inc();
        }

        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Record a successful operation that moved `size` bytes
    pub(crate) fn finish(self, size: usize) {
        let elapsed = self.start.elapsed();
        debug!(
            operation = self.operation,
            size,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Store operation completed"
        );

        #[cfg(feature = "metrics")]
        if let Some(metrics) = StowMetrics::global() {
            metrics
                .latency_seconds
                .with_label_values(&[self.operation])
                .observe(elapsed.as_secs_f64());
            metrics.object_size_bytes.observe(size as f64);
        }
    }

    /// Record a failed operation
    pub(crate) fn fail(self, error: &StowError) {
        let elapsed = self.start.elapsed();
        debug!(
            operation = self.operation,
            kind = error.kind(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Store operation failed"
        );

        #[cfg(feature = "metrics")]
        if let Some(metrics) = StowMetrics::global() {
            metrics
                .latency_seconds
                .with_label_values(&[self.operation])
                .observe(elapsed.as_secs_f64());
            metrics
                .failures_total
                .with_label_values(&[self.operation, error.kind()])
                .inc();
        }
    }
}

/// Count a history rotation
pub(crate) fn record_history_rotation() {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = StowMetrics::global() {
        metrics.history_rotations_total.inc();
    }
}

/// Install the global tracing subscriber
///
/// The filter comes from `RUST_LOG`, falling back to `default_level` when it
/// is unset. `json` selects structured JSON lines instead of human-readable
/// output. Logs go to stderr.
pub fn init_observability(json: bool, default_level: &str) -> Result<()> {
    #[cfg(feature = "metrics")]
    StowMetrics::global();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|e| StowError::validation(format!("Invalid log level '{default_level}': {e}")))?,
    };

    let subscriber = TracingRegistry::default()
        .with(filter)
        .with(json.then(|| {
            fmt::layer()
                .json()
                .with_target(false)
                .with_current_span(false)
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr)));

    set_global_default(subscriber).map_err(|e| {
        StowError::storage(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    debug!("stow observability initialized");
    Ok(())
}

/// Initialize observability with default settings (plain text, `info`)
pub fn init_default_observability() -> Result<()> {
    init_observability(false, "info")
}
