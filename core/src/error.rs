//! Error taxonomy for clinic slot allocation.
//!
//! Every failure is reported to callers as a typed [`ClinicError`]. Only two
//! conditions are retryable: [`ClinicError::Busy`] (the caller retries) and
//! [`ClinicError::IssuanceConflict`] (retried internally, bounded).
//! [`ClinicError::Inconsistent`] signals data corruption and is never
//! corrected automatically.

use crate::ids::{DoctorId, IdKind, PatientId, ReservationId, ScheduleId};
use crate::reservation::ReservationStatus;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

/// Convenience alias used across the workspace
pub type Result<T, E = ClinicError> = std::result::Result<T, E>;

/// Errors raised by a persistence backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Backend temporarily unreachable; the operation may succeed later.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the operation.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors surfaced by the slot-allocation core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClinicError {
    /// Malformed input reached the core (should have been caught upstream).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The schedule has no free capacity left.
    #[error("Schedule {schedule_id} is full (capacity {capacity})")]
    ScheduleFull {
        /// Schedule that was full
        schedule_id: ScheduleId,
        /// Its capacity
        capacity: u32,
    },

    /// The schedule was withdrawn by an operator and takes no bookings.
    #[error("Schedule {0} was withdrawn")]
    ScheduleWithdrawn(ScheduleId),

    /// Requested status is unreachable from the current one.
    #[error("Reservation {reservation_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Reservation concerned
        reservation_id: ReservationId,
        /// Current status
        from: ReservationStatus,
        /// Requested status
        to: ReservationStatus,
    },

    /// End time is not after start time.
    #[error("Invalid window: end {end} must be after start {start}")]
    InvalidWindow {
        /// Window start
        start: NaiveTime,
        /// Window end
        end: NaiveTime,
    },

    /// Slot category text outside morning/afternoon/evening.
    #[error("Invalid slot category: {0:?}")]
    InvalidCategory(String),

    /// Capacity is zero or below the number of units already booked.
    #[error("Invalid capacity {capacity} (booked {booked})")]
    InvalidCapacity {
        /// Requested capacity
        capacity: u32,
        /// Units currently booked
        booked: u32,
    },

    /// Schedule date lies before today.
    #[error("Date {date} is in the past (today is {today})")]
    PastDate {
        /// Requested date
        date: NaiveDate,
        /// Current date
        today: NaiveDate,
    },

    /// Reservation time is not strictly after the moment of request.
    #[error("Reservation time {scheduled_at} is not after {now}")]
    InvalidTime {
        /// Time the reservation would take place
        scheduled_at: DateTime<Utc>,
        /// Moment of request
        now: DateTime<Utc>,
    },

    /// Cancel/complete requested on a reservation that is not booked.
    #[error("Reservation {reservation_id} is {status}, not booked")]
    NotBooked {
        /// Reservation concerned
        reservation_id: ReservationId,
        /// Its current status
        status: ReservationStatus,
    },

    /// The per-schedule lock could not be acquired in time. Retryable.
    #[error("Schedule {schedule_id} is busy (waited {waited_ms} ms)")]
    Busy {
        /// Contended schedule
        schedule_id: ScheduleId,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// No unique identifier could be issued within the attempt budget.
    #[error("Could not issue a unique {kind} id after {attempts} attempts")]
    IssuanceConflict {
        /// Identifier kind
        kind: IdKind,
        /// Attempts made
        attempts: u32,
    },

    /// Booked count and the reservations holding units disagree. Requires reconciliation.
    #[error(
        "Schedule {schedule_id} is inconsistent: booked count {booked_count}, \
         reservations holding units {holding_reservations}"
    )]
    Inconsistent {
        /// Schedule concerned
        schedule_id: ScheduleId,
        /// Booked count stored on the schedule
        booked_count: u32,
        /// Booked or completed reservations referencing it
        holding_reservations: u32,
    },

    /// Unknown schedule.
    #[error("Schedule {0} not found")]
    ScheduleNotFound(ScheduleId),

    /// Unknown reservation.
    #[error("Reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// Unknown doctor.
    #[error("Doctor {0} not found")]
    DoctorNotFound(DoctorId),

    /// Unknown patient.
    #[error("Patient {0} not found")]
    PatientNotFound(PatientId),

    /// Unknown department.
    #[error("Department {0:?} not found")]
    DepartmentNotFound(String),

    /// Department name already taken.
    #[error("Department {0:?} already exists")]
    DuplicateDepartment(String),

    /// Department still has doctors assigned.
    #[error("Department {department:?} still has {doctors} doctor(s)")]
    DepartmentNotEmpty {
        /// Department concerned
        department: String,
        /// Doctors still assigned
        doctors: usize,
    },

    /// Persistence backend failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The atomic unit of work was aborted before reporting a result.
    #[error("Operation interrupted: {0}")]
    Interrupted(String),
}

impl ClinicError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. }
                | Self::IssuanceConflict { .. }
                | Self::Repository(RepositoryError::Unavailable(_))
        )
    }

    /// Whether the error indicates corrupted state rather than an
    /// operational outcome.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Inconsistent { .. })
    }

    /// Short machine-friendly name, used as a metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ScheduleFull { .. } => "schedule_full",
            Self::ScheduleWithdrawn(_) => "schedule_withdrawn",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidWindow { .. } => "invalid_window",
            Self::InvalidCategory(_) => "invalid_category",
            Self::InvalidCapacity { .. } => "invalid_capacity",
            Self::PastDate { .. } => "past_date",
            Self::InvalidTime { .. } => "invalid_time",
            Self::NotBooked { .. } => "not_booked",
            Self::Busy { .. } => "busy",
            Self::IssuanceConflict { .. } => "issuance_conflict",
            Self::Inconsistent { .. } => "inconsistent",
            Self::ScheduleNotFound(_)
            | Self::ReservationNotFound(_)
            | Self::DoctorNotFound(_)
            | Self::PatientNotFound(_)
            | Self::DepartmentNotFound(_) => "not_found",
            Self::DuplicateDepartment(_) => "duplicate",
            Self::DepartmentNotEmpty { .. } => "department_not_empty",
            Self::Repository(_) => "repository",
            Self::Interrupted(_) => "interrupted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_issuance_are_retryable() {
        let busy = ClinicError::Busy {
            schedule_id: ScheduleId::new(),
            waited_ms: 10,
        };
        assert!(busy.is_retryable());
        assert!(
            ClinicError::IssuanceConflict {
                kind: IdKind::Reservation,
                attempts: 3
            }
            .is_retryable()
        );
        assert!(!ClinicError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn inconsistent_is_the_only_fatal_error() {
        let err = ClinicError::Inconsistent {
            schedule_id: ScheduleId::new(),
            booked_count: 3,
            holding_reservations: 2,
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("booked count 3"));
    }

    #[test]
    fn repository_errors_convert() {
        let err: ClinicError = RepositoryError::Unavailable("down".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "repository");
        assert_eq!(err.to_string(), "Storage unavailable: down");
    }
}
