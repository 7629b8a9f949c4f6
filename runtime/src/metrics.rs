//! Prometheus metrics for the clinic services.
//!
//! Metrics are emitted through the `metrics` facade everywhere; nothing is
//! recorded unless a recorder is installed. [`MetricsRecorder::install`]
//! installs the Prometheus recorder and registers descriptions for:
//!
//! - bookings, cancellations and completions (by outcome)
//! - per-schedule lock waits and timeouts
//! - identifier issuance collisions
//! - deferred capacity releases and their reconciliation
//! - retries
//!
//! # Example
//!
//! ```rust,no_run
//! use clinic_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), clinic_runtime::MetricsError> {
//! let recorder = MetricsRecorder::install()?;
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Registers metric descriptions and installs the Prometheus recorder.
    ///
    /// If another recorder is already installed (e.g. by a previous test in
    /// the same process) a recorder without a render handle is returned.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    pub fn install() -> Result<Self, MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("seconds".to_string()),
                &[
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                tracing::info!("Prometheus metrics recorder installed");
                Ok(Self {
                    handle: Some(handle),
                })
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("already") {
                    tracing::warn!("Metrics recorder already installed, reusing it");
                    Ok(Self { handle: None })
                } else {
                    Err(MetricsError::Install(message))
                }
            }
        }
    }

    /// Current metrics in Prometheus text format.
    ///
    /// Returns `None` if this recorder does not own the global handle.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Booking
    describe_counter!(
        "clinic_bookings_total",
        "Booking attempts by outcome (booked or error kind)"
    );
    describe_counter!(
        "clinic_cancellations_total",
        "Cancellation attempts by outcome"
    );
    describe_counter!(
        "clinic_completions_total",
        "Completion attempts by outcome"
    );
    describe_counter!(
        "clinic_compensations_total",
        "Units released because the reservation write failed after the unit was taken"
    );
    describe_histogram!(
        "clinic_booking_duration_seconds",
        "Time spent in the booking critical section"
    );

    // Locks
    describe_histogram!(
        "clinic_lock_wait_seconds",
        "Time spent waiting for a schedule lock"
    );
    describe_counter!(
        "clinic_lock_timeouts_total",
        "Schedule lock acquisitions that timed out"
    );

    // Issuance
    describe_counter!(
        "clinic_ids_issued_total",
        "Identifiers issued, by kind"
    );
    describe_counter!(
        "clinic_id_collisions_total",
        "Candidate identifiers rejected as already taken, by kind"
    );

    // Reconciliation
    describe_gauge!(
        "clinic_pending_releases",
        "Cancelled reservations whose capacity release is still pending"
    );
    describe_counter!(
        "clinic_releases_deferred_total",
        "Capacity releases deferred to the reconciler"
    );
    describe_counter!(
        "clinic_releases_reconciled_total",
        "Deferred capacity releases applied by the reconciler"
    );

    // Retry
    describe_counter!("clinic_retry_attempts_total", "Retries performed");
    describe_counter!(
        "clinic_retry_successes_total",
        "Operations that succeeded after at least one retry"
    );
    describe_counter!(
        "clinic_retry_exhausted_total",
        "Operations that ran out of retries"
    );
}

/// Booking coordinator metrics.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a booking outcome (`"booked"` or an error kind).
    pub fn record_booking(outcome: &'static str, duration: Duration) {
        counter!("clinic_bookings_total", "outcome" => outcome).increment(1);
        histogram!("clinic_booking_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a cancellation outcome.
    pub fn record_cancellation(outcome: &'static str) {
        counter!("clinic_cancellations_total", "outcome" => outcome).increment(1);
    }

    /// Record a completion outcome.
    pub fn record_completion(outcome: &'static str) {
        counter!("clinic_completions_total", "outcome" => outcome).increment(1);
    }

    /// Record a compensating release.
    pub fn record_compensation() {
        counter!("clinic_compensations_total").increment(1);
    }
}

/// Keyed lock metrics.
pub struct LockMetrics;

impl LockMetrics {
    /// Record a successful acquisition and how long it waited.
    pub fn record_wait(waited: Duration) {
        histogram!("clinic_lock_wait_seconds").record(waited.as_secs_f64());
    }

    /// Record a timed-out acquisition.
    pub fn record_timeout() {
        counter!("clinic_lock_timeouts_total").increment(1);
    }
}

/// Identifier issuer metrics.
pub struct IssuerMetrics;

impl IssuerMetrics {
    /// Record an issued identifier.
    pub fn record_issued(kind: &'static str) {
        counter!("clinic_ids_issued_total", "kind" => kind).increment(1);
    }

    /// Record a rejected candidate.
    pub fn record_collision(kind: &'static str) {
        counter!("clinic_id_collisions_total", "kind" => kind).increment(1);
    }
}

/// Release reconciliation metrics.
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    /// Record a release handed to the reconciler.
    pub fn record_deferred() {
        counter!("clinic_releases_deferred_total").increment(1);
    }

    /// Record a release the reconciler applied.
    pub fn record_reconciled() {
        counter!("clinic_releases_reconciled_total").increment(1);
    }

    /// Record the pending queue length.
    #[allow(clippy::cast_precision_loss)] // queue lengths stay far below 2^52
    pub fn record_pending(len: usize) {
        gauge!("clinic_pending_releases").set(len as f64);
    }
}

/// Retry metrics.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry.
    pub fn record_attempt() {
        counter!("clinic_retry_attempts_total").increment(1);
    }

    /// Record success after retrying.
    pub fn record_success() {
        counter!("clinic_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("clinic_retry_exhausted_total").increment(1);
    }
}
