//! In-memory repository backend.
//!
//! [`InMemoryRepository`] keeps records in a `BTreeMap` behind a `RwLock`, so
//! listings come back ordered by key. Clones share the same storage. It backs
//! the demo binary and the test suites; a database-backed implementation of
//! the same traits can replace it without touching the services.

use clinic_core::{
    Department, DepartmentRepository, Doctor, DoctorId, DoctorRepository, Entity, Patient,
    PatientId, PatientRepository, RepoFuture, Repository, Reservation, ReservationRepository,
    Schedule, ScheduleId, ScheduleRepository,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Repository storing records in process memory.
pub struct InMemoryRepository<E: Entity> {
    records: Arc<RwLock<BTreeMap<E::Id, E>>>,
}

impl<E: Entity> InMemoryRepository<E> {
    /// Creates an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Records matching `predicate`, ordered by key
    fn matching(&self, predicate: impl Fn(&E) -> bool) -> Vec<E> {
        self.read()
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<E::Id, E>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<E::Id, E>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Clone for InMemoryRepository<E> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<E: Entity> fmt::Debug for InMemoryRepository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("len", &self.len())
            .finish()
    }
}

impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    fn get(&self, id: &E::Id) -> RepoFuture<'_, Option<E>> {
        let record = self.read().get(id).cloned();
        Box::pin(async move { Ok(record) })
    }

    fn save(&self, entity: E) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            self.write().insert(entity.id().clone(), entity);
            Ok(())
        })
    }

    fn delete(&self, id: &E::Id) -> RepoFuture<'_, bool> {
        let removed = self.write().remove(id).is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn list_all(&self) -> RepoFuture<'_, Vec<E>> {
        Box::pin(async move { Ok(self.matching(|_| true)) })
    }
}

impl ScheduleRepository for InMemoryRepository<Schedule> {
    fn list_by_doctor(&self, doctor_id: &DoctorId) -> RepoFuture<'_, Vec<Schedule>> {
        let found = self.matching(|s| &s.doctor_id == doctor_id);
        Box::pin(async move { Ok(found) })
    }
}

impl ReservationRepository for InMemoryRepository<Reservation> {
    fn list_by_patient(&self, patient_id: &PatientId) -> RepoFuture<'_, Vec<Reservation>> {
        let found = self.matching(|r| &r.patient_id == patient_id);
        Box::pin(async move { Ok(found) })
    }

    fn list_by_doctor(&self, doctor_id: &DoctorId) -> RepoFuture<'_, Vec<Reservation>> {
        let found = self.matching(|r| &r.doctor_id == doctor_id);
        Box::pin(async move { Ok(found) })
    }

    fn list_by_schedule(&self, schedule_id: &ScheduleId) -> RepoFuture<'_, Vec<Reservation>> {
        let found = self.matching(|r| &r.schedule_id == schedule_id);
        Box::pin(async move { Ok(found) })
    }
}

impl DoctorRepository for InMemoryRepository<Doctor> {
    fn list_by_department(&self, department: &str) -> RepoFuture<'_, Vec<Doctor>> {
        let found = self.matching(|d| d.department.as_deref() == Some(department));
        Box::pin(async move { Ok(found) })
    }
}

impl PatientRepository for InMemoryRepository<Patient> {}

impl DepartmentRepository for InMemoryRepository<Department> {}
