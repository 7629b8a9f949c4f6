//! Deferred capacity releases and their reconciliation.
//!
//! A cancellation is committed before its unit is returned to the schedule.
//! If returning the unit fails, the release is recorded in
//! [`PendingReleases`] instead of being dropped, and the [`Reconciler`]
//! applies it later under the schedule's lock. Booking compensations that
//! fail are recorded the same way.

use crate::events::EventPublisher;
use crate::ledger::{ScheduleLedger, UnitChange};
use crate::registry::ReservationRegistry;
use clinic_core::environment::Clock;
use clinic_core::{ClinicError, ClinicEvent, DateTime, ReservationId, Result, ScheduleId, Utc};
use clinic_runtime::metrics::ReconcileMetrics;
use clinic_runtime::{RetryPolicy, retry_with_predicate};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A unit that still has to be returned to a schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRelease {
    /// Position in the queue, assigned on push
    pub seq: u64,
    /// Schedule holding the stale unit
    pub schedule_id: ScheduleId,
    /// Cancelled reservation, or `None` when a booking compensation failed
    pub reservation_id: Option<ReservationId>,
    /// Failed attempts so far, including the original one
    pub attempts: u32,
    /// Most recent failure
    pub last_error: String,
    /// When the release was first deferred
    pub deferred_at: DateTime<Utc>,
    /// When it was last attempted
    pub last_attempt_at: DateTime<Utc>,
}

impl PendingRelease {
    /// A release that just failed for `error`
    #[must_use]
    pub fn new(
        schedule_id: ScheduleId,
        reservation_id: Option<ReservationId>,
        error: &ClinicError,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            seq: 0,
            schedule_id,
            reservation_id,
            attempts: 1,
            last_error: error.to_string(),
            deferred_at: at,
            last_attempt_at: at,
        }
    }
}

/// Queue of deferred releases. Entries leave it only once applied, and
/// only while the applier holds the schedule's lock, so an audit under that
/// lock always counts every unit still owed.
#[derive(Debug, Default)]
pub struct PendingReleases {
    queue: Mutex<Queue>,
}

#[derive(Debug, Default)]
struct Queue {
    entries: VecDeque<PendingRelease>,
    next_seq: u64,
}

impl PendingReleases {
    /// Empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a release under a fresh sequence number
    pub fn push(&self, mut release: PendingRelease) {
        let mut queue = self.lock();
        release.seq = queue.next_seq;
        queue.next_seq += 1;
        queue.entries.push_back(release);
        ReconcileMetrics::record_pending(queue.entries.len());
    }

    /// Drops the release with sequence `seq`. Returns whether it was queued.
    pub fn remove(&self, seq: u64) -> bool {
        let mut queue = self.lock();
        let before = queue.entries.len();
        queue.entries.retain(|r| r.seq != seq);
        ReconcileMetrics::record_pending(queue.entries.len());
        queue.entries.len() != before
    }

    /// Whether the release with sequence `seq` is still queued
    #[must_use]
    pub fn contains(&self, seq: u64) -> bool {
        self.lock().entries.iter().any(|r| r.seq == seq)
    }

    /// Records another failed attempt on a queued release. Returns the new
    /// attempt count, or `None` if the release is no longer queued.
    pub fn record_failure(
        &self,
        seq: u64,
        error: &ClinicError,
        at: DateTime<Utc>,
    ) -> Option<u32> {
        let mut queue = self.lock();
        let release = queue.entries.iter_mut().find(|r| r.seq == seq)?;
        release.attempts += 1;
        release.last_error = error.to_string();
        release.last_attempt_at = at;
        Some(release.attempts)
    }

    /// Copies of the queued releases, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<PendingRelease> {
        self.lock().entries.iter().cloned().collect()
    }

    /// Releases queued for one schedule
    #[must_use]
    pub fn count_for(&self, schedule_id: &ScheduleId) -> u32 {
        let count = self
            .lock()
            .entries
            .iter()
            .filter(|r| &r.schedule_id == schedule_id)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Number of queued releases
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Releases applied
    pub reconciled: usize,
    /// Releases still pending
    pub remaining: usize,
}

/// Applies deferred releases.
pub struct Reconciler {
    ledger: Arc<ScheduleLedger>,
    registry: Arc<ReservationRegistry>,
    pending: Arc<PendingReleases>,
    events: EventPublisher,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl Reconciler {
    /// Creates a reconciler draining `pending`
    #[must_use]
    pub fn new(
        ledger: Arc<ScheduleLedger>,
        registry: Arc<ReservationRegistry>,
        pending: Arc<PendingReleases>,
        events: EventPublisher,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            registry,
            pending,
            events,
            clock,
            policy,
        }
    }

    /// Attempts every release queued when the pass starts (with in-pass
    /// backoff for retryable failures). Releases stay queued until applied.
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for release in self.pending.snapshot() {
            let outcome = retry_with_predicate(
                self.policy.clone(),
                || self.apply(&release),
                ClinicError::is_retryable,
            )
            .await;

            match outcome {
                // Applied by an overlapping pass
                Ok(false) => {}
                Ok(true) => {
                    report.reconciled += 1;
                    ReconcileMetrics::record_reconciled();
                    tracing::info!(
                        schedule_id = %release.schedule_id,
                        reservation_id = ?release.reservation_id,
                        attempts = release.attempts + 1,
                        "Deferred release applied"
                    );
                    self.events.publish(ClinicEvent::ReleaseReconciled {
                        reservation_id: release.reservation_id,
                        schedule_id: release.schedule_id,
                        attempts: release.attempts + 1,
                    });
                }
                Err(err) => {
                    if err.is_fatal() {
                        tracing::error!(
                            schedule_id = %release.schedule_id,
                            error = %err,
                            "Deferred release found inconsistent schedule"
                        );
                    } else {
                        tracing::warn!(
                            schedule_id = %release.schedule_id,
                            attempts = release.attempts + 1,
                            error = %err,
                            "Deferred release failed again"
                        );
                    }
                    if self
                        .pending
                        .record_failure(release.seq, &err, self.clock.now())
                        .is_some()
                    {
                        report.remaining += 1;
                    }
                }
            }
        }

        report
    }

    /// Runs [`Reconciler::run_once`] every `interval` until `shutdown`
    /// becomes `true` or its sender is dropped.
    #[must_use]
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !self.pending.is_empty() {
                            let report = self.run_once().await;
                            tracing::debug!(?report, "Reconciliation pass finished");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Reconciler stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn apply(&self, release: &PendingRelease) -> Result<bool> {
        let guard = self.ledger.lock(release.schedule_id).await?;
        if !self.pending.contains(release.seq) {
            return Ok(false);
        }

        if let Some(reservation_id) = &release.reservation_id {
            let reservation = self.registry.get(reservation_id).await?;
            if reservation.holds_unit() {
                return Err(ClinicError::Validation(format!(
                    "reservation {reservation_id} is {}; refusing to release its unit",
                    reservation.status()
                )));
            }
        }

        match self.ledger.release_unit(&guard).await? {
            UnitChange::Applied(_) => {
                self.pending.remove(release.seq);
                Ok(true)
            }
            UnitChange::Refused(schedule) => Err(ClinicError::Inconsistent {
                schedule_id: schedule.id,
                booked_count: schedule.booked(),
                holding_reservations: self.registry.count_holding(&schedule.id).await?,
            }),
        }
    }
}
