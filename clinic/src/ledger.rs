//! Schedule ledger: capacity accounting per schedule.
//!
//! Every capacity-affecting mutation takes a [`ScheduleGuard`], obtained from
//! [`ScheduleLedger::lock`], as proof that the caller holds the schedule's
//! lock. Each mutation is a load-modify-save of a single schedule record, so
//! two holders can never interleave their writes.

use clinic_core::environment::Clock;
use clinic_core::{
    ClinicError, DoctorId, DoctorRepository, NaiveDate, Repository, Result, Schedule, ScheduleId,
    ScheduleRepository, ScheduleRequest,
};
use clinic_runtime::{KeyGuard, KeyedLocks};
use std::sync::Arc;
use std::time::Duration;

/// Exclusive access to one schedule. Dropping it releases the lock.
#[derive(Debug)]
pub struct ScheduleGuard {
    inner: KeyGuard<ScheduleId>,
}

impl ScheduleGuard {
    /// Schedule this guard locks
    #[must_use]
    pub const fn schedule_id(&self) -> &ScheduleId {
        self.inner.key()
    }
}

/// Result of a single-unit capacity change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitChange {
    /// The unit was taken or returned; carries the saved schedule
    Applied(Schedule),
    /// Nothing changed; carries the schedule as it stands
    Refused(Schedule),
}

impl UnitChange {
    /// Whether the change took effect
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Schedule after the attempt
    #[must_use]
    pub const fn schedule(&self) -> &Schedule {
        match self {
            Self::Applied(schedule) | Self::Refused(schedule) => schedule,
        }
    }
}

/// Owns schedules and their capacity accounting.
pub struct ScheduleLedger {
    schedules: Arc<dyn ScheduleRepository>,
    doctors: Arc<dyn DoctorRepository>,
    locks: KeyedLocks<ScheduleId>,
    clock: Arc<dyn Clock>,
}

impl ScheduleLedger {
    /// Creates a ledger whose locks wait at most `lock_timeout`
    #[must_use]
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        doctors: Arc<dyn DoctorRepository>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            schedules,
            doctors,
            locks: KeyedLocks::new(lock_timeout),
            clock,
        }
    }

    /// Publishes a new schedule with nothing booked.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::InvalidWindow`], [`ClinicError::InvalidCapacity`] or
    ///   [`ClinicError::PastDate`] if the request is invalid
    /// - [`ClinicError::DoctorNotFound`] if the doctor is unknown
    pub async fn create(&self, request: ScheduleRequest) -> Result<Schedule> {
        let schedule = Schedule::open(ScheduleId::new(), request, self.clock.today())?;

        if self.doctors.get(&schedule.doctor_id).await?.is_none() {
            return Err(ClinicError::DoctorNotFound(schedule.doctor_id));
        }

        self.schedules.save(schedule.clone()).await?;
        tracing::info!(
            schedule_id = %schedule.id,
            doctor_id = %schedule.doctor_id,
            date = %schedule.date,
            category = %schedule.category,
            capacity = schedule.capacity(),
            "Schedule published"
        );
        Ok(schedule)
    }

    /// Acquires the schedule's lock.
    ///
    /// # Errors
    ///
    /// [`ClinicError::Busy`] if the lock is not acquired within the timeout.
    pub async fn lock(&self, schedule_id: ScheduleId) -> Result<ScheduleGuard> {
        self.locks
            .acquire(&schedule_id)
            .await
            .map(|inner| ScheduleGuard { inner })
            .map_err(|timeout| ClinicError::Busy {
                schedule_id,
                waited_ms: u64::try_from(timeout.waited.as_millis()).unwrap_or(u64::MAX),
            })
    }

    /// Loads a schedule.
    ///
    /// # Errors
    ///
    /// [`ClinicError::ScheduleNotFound`] if absent.
    pub async fn get(&self, schedule_id: &ScheduleId) -> Result<Schedule> {
        self.schedules
            .get(schedule_id)
            .await?
            .ok_or(ClinicError::ScheduleNotFound(*schedule_id))
    }

    /// Schedules published by a doctor, ordered by date then start time
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails.
    pub async fn list_by_doctor(&self, doctor_id: &DoctorId) -> Result<Vec<Schedule>> {
        let mut schedules = self.schedules.list_by_doctor(doctor_id).await?;
        schedules.sort_by_key(|s| (s.date, s.start, s.id));
        Ok(schedules)
    }

    /// Takes one unit if the schedule is neither full nor withdrawn.
    ///
    /// # Errors
    ///
    /// [`ClinicError::ScheduleNotFound`] or a repository failure. On error
    /// nothing was saved.
    pub async fn try_reserve_unit(&self, guard: &ScheduleGuard) -> Result<UnitChange> {
        let mut schedule = self.get(guard.schedule_id()).await?;
        if !schedule.reserve_unit() {
            return Ok(UnitChange::Refused(schedule));
        }
        self.schedules.save(schedule.clone()).await?;
        Ok(UnitChange::Applied(schedule))
    }

    /// Returns one unit if any is booked.
    ///
    /// # Errors
    ///
    /// [`ClinicError::ScheduleNotFound`] or a repository failure. On error
    /// nothing was saved.
    pub async fn release_unit(&self, guard: &ScheduleGuard) -> Result<UnitChange> {
        let mut schedule = self.get(guard.schedule_id()).await?;
        if !schedule.release_unit() {
            return Ok(UnitChange::Refused(schedule));
        }
        self.schedules.save(schedule.clone()).await?;
        Ok(UnitChange::Applied(schedule))
    }

    /// Changes a schedule's capacity.
    ///
    /// # Errors
    ///
    /// [`ClinicError::InvalidCapacity`] if `capacity` is zero or below the
    /// booked count, plus lookup and repository failures.
    pub async fn resize(&self, guard: &ScheduleGuard, capacity: u32) -> Result<Schedule> {
        let mut schedule = self.get(guard.schedule_id()).await?;
        schedule.resize(capacity)?;
        self.schedules.save(schedule.clone()).await?;
        Ok(schedule)
    }

    /// Withdraws a schedule from booking. Withdrawing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Lookup and repository failures.
    pub async fn withdraw(&self, guard: &ScheduleGuard) -> Result<Schedule> {
        let mut schedule = self.get(guard.schedule_id()).await?;
        schedule.withdraw();
        self.schedules.save(schedule.clone()).await?;
        Ok(schedule)
    }

    /// Bookable schedules of a doctor dated within `from..=to` that have not
    /// started yet, ordered by date then start time.
    ///
    /// Full and withdrawn schedules are excluded.
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails.
    pub async fn find_free_slots(
        &self,
        doctor_id: &DoctorId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Schedule>> {
        let now = self.clock.now();
        let mut free = self.list_by_doctor(doctor_id).await?;
        free.retain(|s| (from..=to).contains(&s.date) && s.is_bookable() && s.starts_at() > now);
        Ok(free)
    }
}
