//! Prometheus metrics for the pipe processor.
//!
//! Metrics are recorded through the `metrics` facade and are free when no
//! recorder is installed. [`MetricsServer`] installs the Prometheus exporter:
//!
//! - `pipe_processor_published_total{mode}`: slots published (`normal`, `restore`, `abort`)
//! - `pipe_processor_stage_faults_total{stage}`: stage panics caught by a worker
//! - `pipe_processor_lifecycle_total{event}`: `start`, `stop` and `shutdown` transitions
//! - `pipe_processor_sync_duration_seconds`: time spent in `sync`
//! - `pipe_processor_remaining_capacity`: free ring slots after the latest publication
//!
//! # Example
//!
//! ```rust,no_run
//! use txpipe_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

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

/// Prometheus recorder for the processor metrics.
///
/// `start` installs the global recorder only; it does not open a listener.
/// The caller serves [`render`](Self::render) output at [`addr`](Self::addr),
/// e.g. from its own HTTP endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server for `addr`; nothing is installed until [`start`](Self::start).
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe the processor metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// An already installed global recorder is tolerated with a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed, render output to serve it");
                Ok(())
            },
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            },
        }
    }

    /// Address the caller is expected to serve `render` output on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Describe every processor metric.
pub fn register_metrics() {
    describe_counter!(
        "pipe_processor_published_total",
        "Total number of slots published, by context mode"
    );
    describe_counter!(
        "pipe_processor_stage_faults_total",
        "Total number of stage panics caught by stage workers"
    );
    describe_counter!(
        "pipe_processor_lifecycle_total",
        "Total number of lifecycle transitions, by event"
    );
    describe_histogram!(
        "pipe_processor_sync_duration_seconds",
        "Time spent waiting for a sync barrier"
    );
    describe_gauge!(
        "pipe_processor_remaining_capacity",
        "Free ring buffer slots after the latest publication"
    );
}

/// Processor metrics recorder.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record a published slot.
    pub fn record_published(mode: &'static str, remaining_capacity: usize) {
        counter!("pipe_processor_published_total", "mode" => mode).increment(1);
        #[allow(clippy::cast_precision_loss)] // Ring capacity is far below 2^52
        gauge!("pipe_processor_remaining_capacity").set(remaining_capacity as f64);
    }

    /// Record a caught stage panic.
    pub fn record_stage_fault(stage: &str) {
        counter!("pipe_processor_stage_faults_total", "stage" => stage.to_string()).increment(1);
    }

    /// Record a lifecycle transition.
    pub fn record_lifecycle(event: &'static str) {
        counter!("pipe_processor_lifecycle_total", "event" => event).increment(1);
    }

    /// Record a completed sync barrier.
    pub fn record_sync(duration: Duration) {
        histogram!("pipe_processor_sync_duration_seconds").record(duration.as_secs_f64());
    }
}
