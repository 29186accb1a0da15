//! Prometheus metrics for issuance and validation.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `admission_tickets_issued_total` - Tickets created
//! - `admission_validations_total{outcome,reason}` - Validation attempts by terminal state
//! - `admission_tickets_voided_total{result}` - Void requests (voided, refused)
//! - `admission_key_collisions_total` - Primary key collisions during issuance
//! - `admission_store_transition_conflicts_total{transition}` - Compare-and-set misses
//!
//! ## Histograms
//! - `admission_validation_duration_seconds` - Validation latency, store calls included

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),

    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the global Prometheus recorder and register metric descriptions.
///
/// Call once at startup; the returned handle renders `/metrics`.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    Ok(handle)
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "admission_tickets_issued_total",
        "Total number of tickets issued"
    );
    describe_counter!(
        "admission_validations_total",
        "Total number of validation attempts by outcome and reason code"
    );
    describe_counter!(
        "admission_tickets_voided_total",
        "Total number of void requests by result (voided, refused)"
    );
    describe_counter!(
        "admission_key_collisions_total",
        "Primary key collisions during issuance (anomaly at 144 bits of entropy)"
    );
    describe_counter!(
        "admission_store_transition_conflicts_total",
        "Status transitions that lost the compare-and-set"
    );
    describe_histogram!(
        "admission_validation_duration_seconds",
        "Time taken to validate a credential"
    );

    tracing::info!("Admission metrics registered");
}
