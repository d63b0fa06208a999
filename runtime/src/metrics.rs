//! Prometheus metrics for process execution.
//!
//! Process runs, action executions and failures, and parallel branch
//! failures are recorded through the `metrics` facade. Without an installed
//! recorder every call is a no-op.
//!
//! # Example
//!
//! ```rust,no_run
//! use fractal_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // ... run processes ...
//! if let Some(rendered) = server.render() {
//!     println!("{rendered}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

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

/// Prometheus recorder handle.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe the process metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed is not an error; the handle stays `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("process_runs_total", "Total number of process runs");
    describe_counter!("process_failures_total", "Total number of process runs that failed");
    describe_histogram!("process_run_duration_seconds", "Time taken to run a process");

    describe_counter!("process_actions_executed_total", "Total number of actions executed");
    describe_counter!("process_actions_failed_total", "Total number of actions that failed");
    describe_histogram!("process_action_duration_seconds", "Time taken to execute an action");

    describe_counter!(
        "process_parallel_errors_total",
        "Total number of parallel branches that failed"
    );
}

/// Process metrics recorder.
pub struct ProcessMetrics;

impl ProcessMetrics {
    /// Record a finished process run.
    pub fn record_run(duration: Duration, succeeded: bool) {
        counter!("process_runs_total").increment(1);
        if !succeeded {
            counter!("process_failures_total").increment(1);
        }
        histogram!("process_run_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an action execution.
    pub fn record_action(action: &'static str, duration: Duration) {
        counter!("process_actions_executed_total", "action" => action).increment(1);
        histogram!("process_action_duration_seconds", "action" => action).record(duration.as_secs_f64());
    }

    /// Record an action failure.
    pub fn record_failure(action: &'static str) {
        counter!("process_actions_failed_total", "action" => action).increment(1);
    }

    /// Record a failed parallel branch.
    pub fn record_parallel_error() {
        counter!("process_parallel_errors_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_process_metrics() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        ProcessMetrics::record_action("SetValueAction", Duration::from_micros(40));
        ProcessMetrics::record_failure("RaiseExceptionAction");
        ProcessMetrics::record_parallel_error();
        ProcessMetrics::record_run(Duration::from_millis(2), false);

        // Another test may have installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("process_actions_executed_total"));
            assert!(rendered.contains("process_parallel_errors_total"));
            assert!(rendered.contains("process_failures_total"));
        }
    }
}
