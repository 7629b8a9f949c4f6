//! Domain events broadcast after every committed change.
//!
//! Events are facts: they are emitted only once the corresponding writes are
//! durable, and observers (audit log, metrics, notifications) never feed back
//! into the booking path.

use crate::ids::{DoctorId, PatientId, ReservationId, ScheduleId};
use crate::schedule::SlotCategory;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Facts about schedules and reservations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClinicEvent {
    /// A doctor published availability
    SchedulePublished {
        /// New schedule
        schedule_id: ScheduleId,
        /// Publishing doctor
        doctor_id: DoctorId,
        /// Calendar date
        date: NaiveDate,
        /// Time-of-day bucket
        category: SlotCategory,
        /// Bookable units
        capacity: u32,
        /// When published
        at: DateTime<Utc>,
    },

    /// An operator changed a schedule's capacity
    ScheduleResized {
        /// Schedule concerned
        schedule_id: ScheduleId,
        /// New capacity
        capacity: u32,
        /// When resized
        at: DateTime<Utc>,
    },

    /// An operator withdrew a schedule
    ScheduleWithdrawn {
        /// Schedule concerned
        schedule_id: ScheduleId,
        /// When withdrawn
        at: DateTime<Utc>,
    },

    /// A unit was claimed and a reservation created
    ReservationBooked {
        /// New reservation
        reservation_id: ReservationId,
        /// Schedule the unit came from
        schedule_id: ScheduleId,
        /// Claiming patient
        patient_id: PatientId,
        /// Units left afterwards
        remaining: u32,
        /// When booked
        at: DateTime<Utc>,
    },

    /// A reservation was cancelled and its unit released
    ReservationCancelled {
        /// Reservation concerned
        reservation_id: ReservationId,
        /// Schedule the unit returns to
        schedule_id: ScheduleId,
        /// When cancelled
        at: DateTime<Utc>,
    },

    /// A reservation was completed
    ReservationCompleted {
        /// Reservation concerned
        reservation_id: ReservationId,
        /// Its schedule
        schedule_id: ScheduleId,
        /// When completed
        at: DateTime<Utc>,
    },

    /// A capacity release failed and was queued for the reconciler
    ReleaseDeferred {
        /// Cancelled reservation, or `None` for a failed booking compensation
        reservation_id: Option<ReservationId>,
        /// Schedule still holding the stale unit
        schedule_id: ScheduleId,
        /// Failure that caused the deferral
        reason: String,
    },

    /// A deferred release was applied by the reconciler
    ReleaseReconciled {
        /// Cancelled reservation, or `None` for a failed booking compensation
        reservation_id: Option<ReservationId>,
        /// Schedule that got its unit back
        schedule_id: ScheduleId,
        /// Attempts it took
        attempts: u32,
    },
}

impl ClinicEvent {
    /// Event type name, matching the serialized `type` tag
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SchedulePublished { .. } => "schedule_published",
            Self::ScheduleResized { .. } => "schedule_resized",
            Self::ScheduleWithdrawn { .. } => "schedule_withdrawn",
            Self::ReservationBooked { .. } => "reservation_booked",
            Self::ReservationCancelled { .. } => "reservation_cancelled",
            Self::ReservationCompleted { .. } => "reservation_completed",
            Self::ReleaseDeferred { .. } => "release_deferred",
            Self::ReleaseReconciled { .. } => "release_reconciled",
        }
    }

    /// Schedule the event concerns
    #[must_use]
    pub const fn schedule_id(&self) -> &ScheduleId {
        match self {
            Self::SchedulePublished { schedule_id, .. }
            | Self::ScheduleResized { schedule_id, .. }
            | Self::ScheduleWithdrawn { schedule_id, .. }
            | Self::ReservationBooked { schedule_id, .. }
            | Self::ReservationCancelled { schedule_id, .. }
            | Self::ReservationCompleted { schedule_id, .. }
            | Self::ReleaseDeferred { schedule_id, .. }
            | Self::ReleaseReconciled { schedule_id, .. } => schedule_id,
        }
    }
}
