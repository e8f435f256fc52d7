//! Operation Metrics
//!
//! Prometheus counters and latency histograms for every manager operation,
//! registered on an explicit registry so several managers can coexist in
//! one process.

use crate::error::Result;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Outcome label of a successful operation
pub const OUTCOME_OK: &str = "ok";

/// Metrics recorded by the volume manager
#[derive(Clone)]
pub struct OperationMetrics {
    registry: Registry,
    operations: IntCounterVec,
    durations: HistogramVec,
}

impl OperationMetrics {
    /// Create the metrics and register them on a fresh registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "fsx_volume_operations_total",
                "Volume operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;
        let durations = HistogramVec::new(
            HistogramOpts::new(
                "fsx_volume_operation_duration_seconds",
                "Duration of volume operations",
            )
            .buckets(vec![
                0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 600.0, 1800.0,
            ]),
            &["operation"],
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(durations.clone()))?;

        Ok(Self {
            registry,
            operations,
            durations,
        })
    }

    /// Record one finished operation
    pub fn observe(&self, operation: &str, outcome: &str, elapsed: Duration) {
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
        self.durations
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    /// Number of recorded operations with this outcome
    pub fn count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome])
            .get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for OperationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_encode() {
        let metrics = OperationMetrics::new().unwrap();
        metrics.observe("create_volume", OUTCOME_OK, Duration::from_millis(20));
        metrics.observe("create_volume", "aborted", Duration::from_millis(1));
        metrics.observe("create_volume", OUTCOME_OK, Duration::from_millis(30));

        assert_eq!(metrics.count("create_volume", OUTCOME_OK), 2);
        assert_eq!(metrics.count("create_volume", "aborted"), 1);

        let (content_type, body) = metrics.encode().unwrap();
        assert!(content_type.starts_with("text/plain"));
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("fsx_volume_operations_total"));
        assert!(body.contains("fsx_volume_operation_duration_seconds_bucket"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        OperationMetrics::with_registry(registry.clone()).unwrap();
        assert!(OperationMetrics::with_registry(registry).is_err());
    }
}
