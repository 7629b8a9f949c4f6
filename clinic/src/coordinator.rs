//! Booking coordinator: the only writer of capacity paired with reservations.
//!
//! Each operation is one atomic unit executed under the schedule's lock:
//!
//! ```text
//! book:     lock -> reserve unit -> create reservation
//!                                   `-> on failure: release unit (compensate)
//! cancel:   lock -> booked? -> mark cancelled (durable) -> release unit
//!                                                          `-> on failure: defer
//! complete: lock -> booked? -> mark completed
//! ```
//!
//! Units run on a detached task, so dropping the caller's future (a client
//! disconnect, a timeout) cannot stop one half way: it still completes or
//! compensates, and the caller simply never sees the result.

use crate::events::EventPublisher;
use crate::ledger::{ScheduleGuard, ScheduleLedger, UnitChange};
use crate::reconcile::{PendingRelease, PendingReleases};
use crate::registry::ReservationRegistry;
use clinic_core::environment::Clock;
use clinic_core::{
    ClinicError, ClinicEvent, PatientId, PatientRepository, Repository, Reservation,
    ReservationId, ReservationStatus, Result, Schedule, ScheduleId, ScheduleRequest, ScheduleStatus,
};
use clinic_runtime::metrics::{BookingMetrics, ReconcileMetrics};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::Instrument;

/// Result of [`BookingCoordinator::audit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleAudit {
    /// Audited schedule
    pub schedule_id: ScheduleId,
    /// Booked count stored on the schedule
    pub booked_count: u32,
    /// Booked or completed reservations referencing it
    pub holding_reservations: u32,
    /// Releases for it awaiting the reconciler
    pub pending_releases: u32,
}

impl ScheduleAudit {
    /// Whether the counts agree with no release outstanding
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.pending_releases == 0 && self.booked_count == self.holding_reservations
    }
}

/// Orchestrates booking, cancellation and completion.
#[derive(Clone)]
pub struct BookingCoordinator {
    ledger: Arc<ScheduleLedger>,
    registry: Arc<ReservationRegistry>,
    patients: Arc<dyn PatientRepository>,
    pending: Arc<PendingReleases>,
    events: EventPublisher,
    clock: Arc<dyn Clock>,
}

impl BookingCoordinator {
    /// Creates a coordinator over the given ledger and registry
    #[must_use]
    pub fn new(
        ledger: Arc<ScheduleLedger>,
        registry: Arc<ReservationRegistry>,
        patients: Arc<dyn PatientRepository>,
        pending: Arc<PendingReleases>,
        events: EventPublisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            registry,
            patients,
            pending,
            events,
            clock,
        }
    }

    /// Claims one unit of `schedule_id` for `patient_id`.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::PatientNotFound`] / [`ClinicError::ScheduleNotFound`]
    /// - [`ClinicError::ScheduleFull`] or [`ClinicError::ScheduleWithdrawn`];
    ///   no reservation is created
    /// - [`ClinicError::InvalidTime`] if the schedule has already started
    /// - [`ClinicError::Busy`] if the schedule stayed locked past the timeout
    /// - [`ClinicError::Repository`] / [`ClinicError::IssuanceConflict`]; the
    ///   unit is returned before the error is reported
    #[tracing::instrument(skip_all, fields(patient_id = %patient_id, schedule_id = %schedule_id))]
    pub async fn book(&self, patient_id: PatientId, schedule_id: ScheduleId) -> Result<Reservation> {
        let started = Instant::now();
        let this = self.clone();
        let result = detached(async move { this.book_unit(patient_id, schedule_id).await }).await;

        BookingMetrics::record_booking(outcome(&result, "booked"), started.elapsed());
        match &result {
            Ok(reservation) => tracing::info!(reservation_id = %reservation.id, "Reservation booked"),
            Err(err) => tracing::warn!(error = %err, "Booking rejected"),
        }
        result
    }

    /// Cancels a booked reservation and returns its unit.
    ///
    /// If the reservation was cancelled but the unit could not be returned,
    /// the cancellation still succeeds and the release is deferred to the
    /// reconciler.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::ReservationNotFound`]
    /// - [`ClinicError::NotBooked`] if already cancelled or completed
    /// - [`ClinicError::Busy`] if the schedule stayed locked past the timeout
    /// - [`ClinicError::Inconsistent`] if the schedule had no unit to return
    #[tracing::instrument(skip_all, fields(reservation_id = %reservation_id))]
    pub async fn cancel(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let this = self.clone();
        let result = detached(async move { this.cancel_unit(reservation_id).await }).await;

        BookingMetrics::record_cancellation(outcome(&result, "cancelled"));
        match &result {
            Ok(_) => tracing::info!("Reservation cancelled"),
            Err(err) if err.is_fatal() => tracing::error!(error = %err, "Cancellation found inconsistent schedule"),
            Err(err) => tracing::warn!(error = %err, "Cancellation rejected"),
        }
        result
    }

    /// Marks a booked reservation as completed. Capacity is unchanged.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::ReservationNotFound`]
    /// - [`ClinicError::NotBooked`] if already cancelled or completed
    /// - [`ClinicError::Busy`] if the schedule stayed locked past the timeout
    #[tracing::instrument(skip_all, fields(reservation_id = %reservation_id))]
    pub async fn complete(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let this = self.clone();
        let result = detached(async move { this.complete_unit(reservation_id).await }).await;

        BookingMetrics::record_completion(outcome(&result, "completed"));
        match &result {
            Ok(_) => tracing::info!("Reservation completed"),
            Err(err) => tracing::warn!(error = %err, "Completion rejected"),
        }
        result
    }

    /// Publishes a schedule and announces it to subscribers.
    ///
    /// # Errors
    ///
    /// See [`ScheduleLedger::create`].
    #[tracing::instrument(skip_all, fields(doctor_id = %request.doctor_id, date = %request.date))]
    pub async fn publish_schedule(&self, request: ScheduleRequest) -> Result<Schedule> {
        let schedule = self.ledger.create(request).await?;
        self.events.publish(ClinicEvent::SchedulePublished {
            schedule_id: schedule.id,
            doctor_id: schedule.doctor_id.clone(),
            date: schedule.date,
            category: schedule.category,
            capacity: schedule.capacity(),
            at: self.clock.now(),
        });
        Ok(schedule)
    }

    /// Changes a schedule's capacity.
    ///
    /// # Errors
    ///
    /// [`ClinicError::InvalidCapacity`] if `capacity` is zero or below the
    /// booked count, plus `Busy`, not-found and repository failures.
    #[tracing::instrument(skip_all, fields(schedule_id = %schedule_id, capacity))]
    pub async fn resize(&self, schedule_id: ScheduleId, capacity: u32) -> Result<Schedule> {
        let this = self.clone();
        let schedule = detached(async move {
            let guard = this.ledger.lock(schedule_id).await?;
            this.ledger.resize(&guard, capacity).await
        })
        .await?;

        tracing::info!(capacity, status = %schedule.status(), "Schedule resized");
        self.events.publish(ClinicEvent::ScheduleResized {
            schedule_id,
            capacity,
            at: self.clock.now(),
        });
        Ok(schedule)
    }

    /// Withdraws a schedule. Existing reservations may still be cancelled or
    /// completed; new bookings fail with `ScheduleWithdrawn`.
    ///
    /// # Errors
    ///
    /// `Busy`, not-found and repository failures.
    #[tracing::instrument(skip_all, fields(schedule_id = %schedule_id))]
    pub async fn withdraw(&self, schedule_id: ScheduleId) -> Result<Schedule> {
        let this = self.clone();
        let schedule = detached(async move {
            let guard = this.ledger.lock(schedule_id).await?;
            this.ledger.withdraw(&guard).await
        })
        .await?;

        tracing::info!(booked = schedule.booked(), "Schedule withdrawn");
        self.events.publish(ClinicEvent::ScheduleWithdrawn {
            schedule_id,
            at: self.clock.now(),
        });
        Ok(schedule)
    }

    /// Recounts the reservations holding a schedule's units under its lock.
    ///
    /// Completed reservations keep their unit. Units awaiting a deferred
    /// release are accounted for: the booked count may exceed the holding
    /// reservations by exactly the number of pending releases for the
    /// schedule.
    ///
    /// # Errors
    ///
    /// [`ClinicError::Inconsistent`] on any other mismatch (logged at error
    /// level, never corrected), plus `Busy`, not-found and repository
    /// failures.
    #[tracing::instrument(skip_all, fields(schedule_id = %schedule_id))]
    pub async fn audit(&self, schedule_id: ScheduleId) -> Result<ScheduleAudit> {
        let guard = self.ledger.lock(schedule_id).await?;
        let schedule = self.ledger.get(guard.schedule_id()).await?;
        let audit = ScheduleAudit {
            schedule_id,
            booked_count: schedule.booked(),
            holding_reservations: self.registry.count_holding(&schedule_id).await?,
            pending_releases: self.pending.count_for(&schedule_id),
        };
        drop(guard);

        if audit.booked_count != audit.holding_reservations + audit.pending_releases {
            tracing::error!(?audit, "Booked count does not match reservations holding units");
            return Err(ClinicError::Inconsistent {
                schedule_id,
                booked_count: audit.booked_count,
                holding_reservations: audit.holding_reservations,
            });
        }
        Ok(audit)
    }

    /// Subscribes to committed domain events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClinicEvent> {
        self.events.subscribe()
    }

    /// Releases currently awaiting the reconciler, oldest first
    #[must_use]
    pub fn pending_releases(&self) -> Vec<PendingRelease> {
        self.pending.snapshot()
    }

    async fn book_unit(&self, patient_id: PatientId, schedule_id: ScheduleId) -> Result<Reservation> {
        if self.patients.get(&patient_id).await?.is_none() {
            return Err(ClinicError::PatientNotFound(patient_id));
        }

        // Start times never change; reject before a unit is taken
        let scheduled_at = self.ledger.get(&schedule_id).await?.starts_at();
        let now = self.clock.now();
        if scheduled_at <= now {
            return Err(ClinicError::InvalidTime { scheduled_at, now });
        }

        let guard = self.ledger.lock(schedule_id).await?;
        let schedule = match self.ledger.try_reserve_unit(&guard).await? {
            UnitChange::Applied(schedule) => schedule,
            UnitChange::Refused(schedule) if schedule.status() == ScheduleStatus::Withdrawn => {
                return Err(ClinicError::ScheduleWithdrawn(schedule_id));
            }
            UnitChange::Refused(schedule) => {
                return Err(ClinicError::ScheduleFull {
                    schedule_id,
                    capacity: schedule.capacity(),
                });
            }
        };

        match self.registry.create(&guard, patient_id.clone(), &schedule).await {
            Ok(reservation) => {
                drop(guard);
                self.events.publish(ClinicEvent::ReservationBooked {
                    reservation_id: reservation.id.clone(),
                    schedule_id,
                    patient_id,
                    remaining: schedule.remaining(),
                    at: reservation.created_at(),
                });
                Ok(reservation)
            }
            Err(err) => {
                self.compensate(&guard, &err).await;
                Err(err)
            }
        }
    }

    /// Returns the unit taken for a booking whose reservation was not saved.
    async fn compensate(&self, guard: &ScheduleGuard, cause: &ClinicError) {
        let schedule_id = *guard.schedule_id();
        BookingMetrics::record_compensation();

        let failure = match self.ledger.release_unit(guard).await {
            Ok(UnitChange::Applied(_)) => {
                tracing::debug!(%schedule_id, cause = %cause, "Booking compensated");
                return;
            }
            Ok(UnitChange::Refused(schedule)) => match self.registry.count_holding(&schedule_id).await {
                Ok(holding_reservations) => ClinicError::Inconsistent {
                    schedule_id,
                    booked_count: schedule.booked(),
                    holding_reservations,
                },
                Err(err) => {
                    tracing::error!(
                        %schedule_id,
                        booked_count = schedule.booked(),
                        error = %err,
                        "Compensating release refused and recount failed"
                    );
                    err
                }
            },
            Err(err) => err,
        };

        tracing::error!(
            %schedule_id,
            cause = %cause,
            error = %failure,
            "Compensating release failed, deferring"
        );
        self.defer(schedule_id, None, &failure);
    }

    async fn cancel_unit(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let reservation = self.registry.get(&reservation_id).await?;
        ensure_booked(&reservation)?;

        let guard = self.ledger.lock(reservation.schedule_id).await?;
        let cancelled = self
            .registry
            .transition(&guard, &reservation_id, ReservationStatus::Cancelled)
            .await
            .map_err(not_booked)?;
        let schedule_id = cancelled.schedule_id;

        match self.ledger.release_unit(&guard).await {
            Ok(UnitChange::Applied(_)) => {
                self.events.publish(ClinicEvent::ReservationCancelled {
                    reservation_id,
                    schedule_id,
                    at: cancelled.cancelled_at().unwrap_or_else(|| self.clock.now()),
                });
                Ok(cancelled)
            }
            Ok(UnitChange::Refused(schedule)) => Err(ClinicError::Inconsistent {
                schedule_id,
                booked_count: schedule.booked(),
                holding_reservations: self.registry.count_holding(&schedule_id).await?,
            }),
            Err(err) => {
                tracing::error!(
                    %schedule_id,
                    error = %err,
                    "Capacity release failed after cancellation, deferring"
                );
                self.defer(schedule_id, Some(reservation_id.clone()), &err);
                self.events.publish(ClinicEvent::ReservationCancelled {
                    reservation_id,
                    schedule_id,
                    at: cancelled.cancelled_at().unwrap_or_else(|| self.clock.now()),
                });
                Ok(cancelled)
            }
        }
    }

    async fn complete_unit(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let reservation = self.registry.get(&reservation_id).await?;
        ensure_booked(&reservation)?;

        let guard = self.ledger.lock(reservation.schedule_id).await?;
        let completed = self
            .registry
            .transition(&guard, &reservation_id, ReservationStatus::Completed)
            .await
            .map_err(not_booked)?;
        drop(guard);

        self.events.publish(ClinicEvent::ReservationCompleted {
            reservation_id,
            schedule_id: completed.schedule_id,
            at: completed.completed_at().unwrap_or_else(|| self.clock.now()),
        });
        Ok(completed)
    }

    fn defer(&self, schedule_id: ScheduleId, reservation_id: Option<ReservationId>, error: &ClinicError) {
        ReconcileMetrics::record_deferred();
        self.pending.push(PendingRelease::new(
            schedule_id,
            reservation_id.clone(),
            error,
            self.clock.now(),
        ));
        self.events.publish(ClinicEvent::ReleaseDeferred {
            reservation_id,
            schedule_id,
            reason: error.to_string(),
        });
    }
}

/// Runs an atomic unit on its own task so the caller cannot cancel it.
async fn detached<T, F>(unit: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(unit.in_current_span())
        .await
        .map_err(|e| ClinicError::Interrupted(e.to_string()))?
}

fn ensure_booked(reservation: &Reservation) -> Result<()> {
    if reservation.is_booked() {
        Ok(())
    } else {
        Err(ClinicError::NotBooked {
            reservation_id: reservation.id.clone(),
            status: reservation.status(),
        })
    }
}

/// A transition refused because another caller got there first
fn not_booked(err: ClinicError) -> ClinicError {
    match err {
        ClinicError::InvalidTransition {
            reservation_id,
            from,
            ..
        } => ClinicError::NotBooked {
            reservation_id,
            status: from,
        },
        other => other,
    }
}

fn outcome<T>(result: &Result<T>, success: &'static str) -> &'static str {
    match result {
        Ok(_) => success,
        Err(err) => err.kind(),
    }
}
