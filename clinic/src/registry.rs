//! Reservation registry: reservation records and their status transitions.
//!
//! Writes require the [`ScheduleGuard`] of the reservation's schedule, so a
//! reservation is only ever created or transitioned while its schedule's
//! capacity accounting is locked.

use crate::issuer::IdIssuer;
use crate::ledger::ScheduleGuard;
use clinic_core::environment::Clock;
use clinic_core::{
    ClinicError, DoctorId, IdKind, PatientId, Repository, Reservation, ReservationId,
    ReservationRepository, ReservationStatus, Result, Schedule, ScheduleId,
};
use std::sync::Arc;

/// Owns reservation records.
pub struct ReservationRegistry {
    reservations: Arc<dyn ReservationRepository>,
    issuer: Arc<IdIssuer>,
    clock: Arc<dyn Clock>,
}

impl ReservationRegistry {
    /// Creates a registry issuing reservation numbers from `issuer`
    #[must_use]
    pub fn new(
        reservations: Arc<dyn ReservationRepository>,
        issuer: Arc<IdIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reservations,
            issuer,
            clock,
        }
    }

    /// Records a booked reservation against `schedule`.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::InvalidTime`] unless the schedule starts after now
    /// - [`ClinicError::IssuanceConflict`] if no reservation number is free
    /// - [`ClinicError::Validation`] if `guard` locks a different schedule
    /// - [`ClinicError::Repository`] if the save fails
    pub async fn create(
        &self,
        guard: &ScheduleGuard,
        patient_id: PatientId,
        schedule: &Schedule,
    ) -> Result<Reservation> {
        ensure_guarded(guard, &schedule.id)?;

        let now = self.clock.now();
        let scheduled_at = schedule.starts_at();
        if scheduled_at <= now {
            return Err(ClinicError::InvalidTime { scheduled_at, now });
        }

        let id = self.issuer.reservation_id().await?;
        let booked = async {
            let reservation = Reservation::book(id.clone(), patient_id, schedule, now)?;
            self.reservations.save(reservation.clone()).await?;
            Ok::<_, ClinicError>(reservation)
        }
        .await;
        self.issuer.settle(IdKind::Reservation, id.as_str());
        booked
    }

    /// Moves a reservation to `target` and stamps the matching timestamp.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::ReservationNotFound`] if absent
    /// - [`ClinicError::Validation`] if `guard` locks a different schedule
    /// - [`ClinicError::InvalidTransition`] if `target` is unreachable
    /// - [`ClinicError::Repository`] if the save fails
    pub async fn transition(
        &self,
        guard: &ScheduleGuard,
        reservation_id: &ReservationId,
        target: ReservationStatus,
    ) -> Result<Reservation> {
        let mut reservation = self.get(reservation_id).await?;
        ensure_guarded(guard, &reservation.schedule_id)?;

        reservation.transition(target, self.clock.now())?;
        self.reservations.save(reservation.clone()).await?;
        Ok(reservation)
    }

    /// Loads a reservation.
    ///
    /// # Errors
    ///
    /// [`ClinicError::ReservationNotFound`] if absent.
    pub async fn get(&self, reservation_id: &ReservationId) -> Result<Reservation> {
        self.reservations
            .get(reservation_id)
            .await?
            .ok_or_else(|| ClinicError::ReservationNotFound(reservation_id.clone()))
    }

    /// Reservations held by a patient, in reservation-number order
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails.
    pub async fn list_by_patient(&self, patient_id: &PatientId) -> Result<Vec<Reservation>> {
        Ok(self.reservations.list_by_patient(patient_id).await?)
    }

    /// Reservations with a doctor, in reservation-number order
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails.
    pub async fn list_by_doctor(&self, doctor_id: &DoctorId) -> Result<Vec<Reservation>> {
        Ok(self.reservations.list_by_doctor(doctor_id).await?)
    }

    /// Reservations taken from a schedule, in reservation-number order
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails.
    pub async fn list_by_schedule(&self, schedule_id: &ScheduleId) -> Result<Vec<Reservation>> {
        Ok(self.reservations.list_by_schedule(schedule_id).await?)
    }

    /// Number of reservations occupying a unit of a schedule (booked or
    /// completed)
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails.
    pub async fn count_holding(&self, schedule_id: &ScheduleId) -> Result<u32> {
        let booked = self
            .list_by_schedule(schedule_id)
            .await?
            .iter()
            .filter(|r| r.holds_unit())
            .count();
        Ok(u32::try_from(booked).unwrap_or(u32::MAX))
    }
}

fn ensure_guarded(guard: &ScheduleGuard, schedule_id: &ScheduleId) -> Result<()> {
    if guard.schedule_id() == schedule_id {
        Ok(())
    } else {
        Err(ClinicError::Validation(format!(
            "lock held on schedule {} but reservation belongs to {schedule_id}",
            guard.schedule_id()
        )))
    }
}
