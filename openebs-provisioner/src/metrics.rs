//! Prometheus metrics for the provisioner
//!
//! Counts provisioning and snapshot operations by outcome, plus the two
//! conditions operators need to act on: deletes skipped because another
//! instance owns the volume, and remote volumes left behind by a provision
//! that failed after creation.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metric names
pub mod names {
    /// Counter: Total number of operations by type and status
    pub const OPERATIONS_TOTAL: &str = "openebs_provisioner_operations_total";
    /// Histogram: Duration of operations in seconds
    pub const OPERATION_DURATION_SECONDS: &str = "openebs_provisioner_operation_duration_seconds";
    /// Counter: Deletes skipped because the volume belongs to another instance
    pub const IGNORED_DELETES_TOTAL: &str = "openebs_provisioner_ignored_deletes_total";
    /// Counter: Remote volumes created by a provision that then failed validation
    pub const ORPHANED_VOLUMES_TOTAL: &str = "openebs_provisioner_orphaned_volumes_total";
}

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP server on the specified address that serves metrics
/// at the `/metrics` endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record an operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

pub fn record_ignored_delete() {
    counter!(names::IGNORED_DELETES_TOTAL).increment(1);
}

pub fn record_orphaned_volume() {
    counter!(names::ORPHANED_VOLUMES_TOTAL).increment(1);
}

/// Helper for timing operations
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Complete the operation with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(self.operation, "success", duration);
    }

    /// Complete the operation with failure
    pub fn failure(self, status: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(self.operation, status, duration);
    }
}
