//! # Clinic Core
//!
//! Domain types, error taxonomy and persistence traits for clinic slot
//! allocation.
//!
//! ## Core Concepts
//!
//! - **Schedule**: a doctor's capacity-bounded, time-bounded availability block
//! - **Reservation**: one patient's claim on one unit of a schedule's capacity
//! - **Repository**: dyn-compatible persistence abstraction per entity
//! - **Clock**: injected time source so timing rules are deterministic in tests
//!
//! ## Invariants
//!
//! - `0 <= booked <= capacity` for every schedule
//! - a schedule is `Full` iff `booked == capacity` (unless withdrawn)
//! - reservation status only moves `Booked -> Cancelled` or `Booked -> Completed`
//!
//! The cross-entity invariant (reservations holding a unit of a schedule,
//! booked or completed, equal the schedule's booked count) is owned by the booking coordinator in the
//! `clinic` crate, never by either entity alone.
//!
//! ## Example
//!
//! ```
//! use chrono::{NaiveDate, NaiveTime};
//! use clinic_core::{DoctorId, Schedule, ScheduleId, ScheduleRequest, SlotCategory};
//!
//! # fn main() -> Result<(), clinic_core::ClinicError> {
//! let today = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap_or_default();
//! let request = ScheduleRequest::new(
//!     DoctorId::parse("10000001")?,
//!     today,
//!     NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
//!     NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
//!     SlotCategory::Morning,
//! )
//! .with_capacity(2);
//!
//! let mut schedule = Schedule::open(ScheduleId::new(), request, today)?;
//! assert!(schedule.reserve_unit());
//! assert!(schedule.reserve_unit());
//! assert!(!schedule.reserve_unit()); // full
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

pub mod directory;
pub mod error;
pub mod event;
pub mod ids;
pub mod repository;
pub mod reservation;
pub mod schedule;

pub use directory::{Department, Doctor, Gender, Patient};
pub use error::{ClinicError, RepositoryError, Result};
pub use event::ClinicEvent;
pub use ids::{DoctorId, IdKind, PatientId, ReservationId, ScheduleId};
pub use repository::{
    DepartmentRepository, DoctorRepository, Entity, PatientRepository, RepoFuture, Repository,
    ReservationRepository, ScheduleRepository,
};
pub use reservation::{Reservation, ReservationStatus};
pub use schedule::{Schedule, ScheduleRequest, ScheduleStatus, SlotCategory, DEFAULT_CAPACITY};

/// Environment module - injected dependencies
///
/// Time is the only ambient dependency of the domain rules: schedule dates
/// may not lie in the past and reservations must start strictly after the
/// moment of request.
pub mod environment {
    use chrono::{DateTime, NaiveDate, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use clinic_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// assert_eq!(clock.today(), clock.now().date_naive());
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Current calendar date (UTC)
        fn today(&self) -> NaiveDate {
            self.now().date_naive()
        }
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
