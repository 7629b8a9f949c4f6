//! Fault injection for repositories.
//!
//! [`FlakyRepository`] wraps any repository and consults a shared [`Faults`]
//! plan before each call. Tests use it to make the second write of a booking
//! fail (exercising compensation), to make a capacity release fail after a
//! cancellation (exercising deferred release), or to slow writes down so a
//! caller can be dropped mid-operation. Listings can fail too, for the
//! recounts that follow a refused release.

#![allow(clippy::module_name_repetitions)]

use clinic_core::{
    DoctorId, Entity, PatientId, RepoFuture, Repository, RepositoryError, Reservation,
    ReservationRepository, Schedule, ScheduleId, ScheduleRepository,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Plan {
    failing_saves: AtomicU32,
    fail_all_saves: AtomicBool,
    failing_gets: AtomicU32,
    failing_lists: AtomicU32,
    nth_save: AtomicU32,
    save_delay_ms: AtomicU64,
    saves: AtomicU32,
}

/// Shared, adjustable fault plan. Clones control the same plan.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    plan: Arc<Plan>,
}

impl Faults {
    /// No faults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` saves with [`RepositoryError::Unavailable`]
    pub fn fail_next_saves(&self, n: u32) {
        self.plan.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Let `n - 1` saves through, then fail the `n`-th one
    pub fn fail_nth_save(&self, n: u32) {
        self.plan.nth_save.store(n, Ordering::SeqCst);
    }

    /// Fail every save until turned off
    pub fn fail_all_saves(&self, on: bool) {
        self.plan.fail_all_saves.store(on, Ordering::SeqCst);
    }

    /// Fail the next `n` gets
    pub fn fail_next_gets(&self, n: u32) {
        self.plan.failing_gets.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` listings
    pub fn fail_next_lists(&self, n: u32) {
        self.plan.failing_lists.store(n, Ordering::SeqCst);
    }

    /// Sleep before every save
    pub fn delay_saves(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.plan.save_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Remove all faults
    pub fn clear(&self) {
        self.fail_next_saves(0);
        self.fail_all_saves(false);
        self.fail_next_gets(0);
        self.fail_next_lists(0);
        self.fail_nth_save(0);
        self.delay_saves(Duration::ZERO);
    }

    /// Saves that reached the backend successfully
    #[must_use]
    pub fn successful_saves(&self) -> u32 {
        self.plan.saves.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn nth_reached(&self) -> bool {
        self.plan
            .nth_save
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok_and(|previous| previous == 1)
    }

    fn save_fault(&self) -> Option<RepositoryError> {
        if self.plan.fail_all_saves.load(Ordering::SeqCst)
            || self.nth_reached()
            || Self::take(&self.plan.failing_saves)
        {
            Some(RepositoryError::Unavailable("injected save failure".to_string()))
        } else {
            None
        }
    }

    fn get_fault(&self) -> Option<RepositoryError> {
        Self::take(&self.plan.failing_gets)
            .then(|| RepositoryError::Unavailable("injected read failure".to_string()))
    }

    fn list_fault(&self) -> Option<RepositoryError> {
        Self::take(&self.plan.failing_lists)
            .then(|| RepositoryError::Unavailable("injected list failure".to_string()))
    }

    fn save_delay(&self) -> Duration {
        Duration::from_millis(self.plan.save_delay_ms.load(Ordering::SeqCst))
    }
}

/// Repository wrapper that injects failures according to a [`Faults`] plan.
#[derive(Debug, Clone)]
pub struct FlakyRepository<R> {
    inner: R,
    faults: Faults,
}

impl<R> FlakyRepository<R> {
    /// Wraps `inner`; returns the wrapper and a handle to its fault plan
    #[must_use]
    pub fn new(inner: R) -> (Self, Faults) {
        let faults = Faults::new();
        (
            Self {
                inner,
                faults: faults.clone(),
            },
            faults,
        )
    }

    /// The wrapped repository
    #[must_use]
    pub const fn inner(&self) -> &R {
        &self.inner
    }
}

impl<E, R> Repository<E> for FlakyRepository<R>
where
    E: Entity,
    R: Repository<E>,
{
    fn get(&self, id: &E::Id) -> RepoFuture<'_, Option<E>> {
        if let Some(err) = self.faults.get_fault() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.get(id)
    }

    fn save(&self, entity: E) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let delay = self.faults.save_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.faults.save_fault() {
                return Err(err);
            }
            self.inner.save(entity).await?;
            self.faults.plan.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn delete(&self, id: &E::Id) -> RepoFuture<'_, bool> {
        self.inner.delete(id)
    }

    fn list_all(&self) -> RepoFuture<'_, Vec<E>> {
        if let Some(err) = self.faults.list_fault() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.list_all()
    }
}

impl<R: ScheduleRepository> ScheduleRepository for FlakyRepository<R> {
    fn list_by_doctor(&self, doctor_id: &DoctorId) -> RepoFuture<'_, Vec<Schedule>> {
        if let Some(err) = self.faults.list_fault() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.list_by_doctor(doctor_id)
    }
}

impl<R: ReservationRepository> ReservationRepository for FlakyRepository<R> {
    fn list_by_patient(&self, patient_id: &PatientId) -> RepoFuture<'_, Vec<Reservation>> {
        if let Some(err) = self.faults.list_fault() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.list_by_patient(patient_id)
    }

    fn list_by_doctor(&self, doctor_id: &DoctorId) -> RepoFuture<'_, Vec<Reservation>> {
        if let Some(err) = self.faults.list_fault() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.list_by_doctor(doctor_id)
    }

    fn list_by_schedule(&self, schedule_id: &ScheduleId) -> RepoFuture<'_, Vec<Reservation>> {
        if let Some(err) = self.faults.list_fault() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.list_by_schedule(schedule_id)
    }
}
