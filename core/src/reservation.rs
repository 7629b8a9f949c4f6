//! Reservations: a patient's claim on one unit of a schedule.

use crate::error::ClinicError;
use crate::ids::{DoctorId, PatientId, ReservationId, ScheduleId};
use crate::schedule::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reservation status. `Cancelled` and `Completed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Holding one unit of capacity
    Booked,
    /// Released by the patient or clinic
    Cancelled,
    /// Visit took place
    Completed,
}

impl ReservationStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Booked)
    }

    /// One-way transition rule
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Booked, Self::Cancelled | Self::Completed)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Booked => "booked",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        })
    }
}

/// One patient's claim on one unit of a schedule's capacity.
///
/// Reservations are never deleted; they only move to a terminal status so the
/// ledger keeps an audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation number
    pub id: ReservationId,
    /// Patient holding the claim
    pub patient_id: PatientId,
    /// Doctor of the schedule
    pub doctor_id: DoctorId,
    /// Schedule the unit was taken from
    pub schedule_id: ScheduleId,
    /// When the visit takes place
    pub scheduled_at: DateTime<Utc>,
    status: ReservationStatus,
    created_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Creates a booked reservation against `schedule`.
    ///
    /// # Errors
    ///
    /// [`ClinicError::InvalidTime`] unless the schedule starts strictly after
    /// `now`.
    pub fn book(
        id: ReservationId,
        patient_id: PatientId,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Self, ClinicError> {
        let scheduled_at = schedule.starts_at();
        if scheduled_at <= now {
            return Err(ClinicError::InvalidTime { scheduled_at, now });
        }

        Ok(Self {
            id,
            patient_id,
            doctor_id: schedule.doctor_id.clone(),
            schedule_id: schedule.id,
            scheduled_at,
            status: ReservationStatus::Booked,
            created_at: now,
            cancelled_at: None,
            completed_at: None,
        })
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> ReservationStatus {
        self.status
    }

    /// Whether the reservation still holds capacity
    #[must_use]
    pub fn is_booked(&self) -> bool {
        self.status == ReservationStatus::Booked
    }

    /// Whether the reservation occupies a unit of its schedule.
    ///
    /// Completed visits keep their unit; only cancellation returns it.
    #[must_use]
    pub const fn holds_unit(&self) -> bool {
        matches!(
            self.status,
            ReservationStatus::Booked | ReservationStatus::Completed
        )
    }

    /// Creation instant (immutable)
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Cancellation instant, set once
    #[must_use]
    pub const fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    /// Completion instant, set once
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Applies a status transition and stamps the matching timestamp.
    ///
    /// # Errors
    ///
    /// [`ClinicError::InvalidTransition`] if `target` is unreachable from the
    /// current status. The reservation is left untouched.
    pub fn transition(&mut self, target: ReservationStatus, now: DateTime<Utc>) -> Result<(), ClinicError> {
        if !self.status.can_transition_to(target) {
            return Err(ClinicError::InvalidTransition {
                reservation_id: self.id.clone(),
                from: self.status,
                to: target,
            });
        }

        match target {
            ReservationStatus::Cancelled => {
                self.cancelled_at.get_or_insert(now);
            }
            ReservationStatus::Completed => {
                self.completed_at.get_or_insert(now);
            }
            ReservationStatus::Booked => {}
        }
        self.status = target;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduleRequest, SlotCategory};
    use chrono::{Duration, NaiveDate, NaiveTime, TimeZone};

    fn schedule() -> Schedule {
        let date = NaiveDate::from_ymd_opt(2030, 3, 1).unwrap();
        let request = ScheduleRequest::new(
            DoctorId::parse("10000001").unwrap(),
            date,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            SlotCategory::Morning,
        );
        Schedule::open(ScheduleId::new(), request, date).unwrap()
    }

    fn before_visit() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 1, 8, 0, 0).unwrap()
    }

    fn booked() -> Reservation {
        Reservation::book(
            ReservationId::parse("100000000001").unwrap(),
            PatientId::parse("1000000001").unwrap(),
            &schedule(),
            before_visit(),
        )
        .unwrap()
    }

    #[test]
    fn booking_copies_schedule_details() {
        let schedule = schedule();
        let reservation = Reservation::book(
            ReservationId::parse("100000000001").unwrap(),
            PatientId::parse("1000000001").unwrap(),
            &schedule,
            before_visit(),
        )
        .unwrap();

        assert_eq!(reservation.schedule_id, schedule.id);
        assert_eq!(reservation.doctor_id, schedule.doctor_id);
        assert_eq!(reservation.scheduled_at, schedule.starts_at());
        assert_eq!(reservation.status(), ReservationStatus::Booked);
        assert_eq!(reservation.created_at(), before_visit());
    }

    #[test]
    fn booking_requires_a_future_visit() {
        let at_start = Utc.with_ymd_and_hms(2030, 3, 1, 9, 0, 0).unwrap();
        let result = Reservation::book(
            ReservationId::parse("100000000001").unwrap(),
            PatientId::parse("1000000001").unwrap(),
            &schedule(),
            at_start,
        );
        assert!(matches!(result, Err(ClinicError::InvalidTime { .. })));
    }

    #[test]
    fn cancel_sets_timestamp_once() {
        let mut reservation = booked();
        let at = before_visit() + Duration::minutes(5);
        reservation.transition(ReservationStatus::Cancelled, at).unwrap();
        assert_eq!(reservation.cancelled_at(), Some(at));
        assert_eq!(reservation.completed_at(), None);

        let err = reservation
            .transition(ReservationStatus::Cancelled, at + Duration::minutes(1))
            .unwrap_err();
        assert!(matches!(err, ClinicError::InvalidTransition { .. }));
        assert_eq!(reservation.cancelled_at(), Some(at));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        let mut reservation = booked();
        reservation
            .transition(ReservationStatus::Completed, before_visit())
            .unwrap();
        for target in [
            ReservationStatus::Booked,
            ReservationStatus::Cancelled,
            ReservationStatus::Completed,
        ] {
            assert!(reservation.transition(target, before_visit()).is_err());
        }
        assert_eq!(reservation.status(), ReservationStatus::Completed);
        assert!(reservation.status().is_terminal());
    }

    #[test]
    fn booked_to_booked_is_rejected() {
        let mut reservation = booked();
        assert!(reservation
            .transition(ReservationStatus::Booked, before_visit())
            .is_err());
    }
}
