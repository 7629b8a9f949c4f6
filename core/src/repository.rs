//! Persistence abstraction.
//!
//! Each entity is stored behind a [`Repository`] offering `get`, `save`
//! (insert-or-update), `delete` and `list_all`, extended per entity with the
//! filtered listings the core needs.
//!
//! # Dyn Compatibility
//!
//! Methods return [`RepoFuture`] (`Pin<Box<dyn Future>>`) instead of using
//! `async fn` so that backends can be injected as `Arc<dyn ScheduleRepository>`
//! and friends.
//!
//! # Atomicity
//!
//! The core never relies on cross-repository transactions. Pairing a schedule
//! save with a reservation save is made atomic by the per-schedule critical
//! section in the booking coordinator, with a compensating release if the
//! second write fails.

use crate::directory::{Department, Doctor, Patient};
use crate::error::RepositoryError;
use crate::ids::{DoctorId, PatientId, ReservationId, ScheduleId};
use crate::reservation::Reservation;
use crate::schedule::Schedule;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;

/// Boxed future returned by repository methods
pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// A persisted record with a stable key
pub trait Entity: Clone + Send + Sync + 'static {
    /// Key type
    type Id: Clone + Ord + Hash + fmt::Display + Send + Sync + 'static;

    /// Borrow the key
    fn id(&self) -> &Self::Id;
}

impl Entity for Schedule {
    type Id = ScheduleId;

    fn id(&self) -> &ScheduleId {
        &self.id
    }
}

impl Entity for Reservation {
    type Id = ReservationId;

    fn id(&self) -> &ReservationId {
        &self.id
    }
}

impl Entity for Doctor {
    type Id = DoctorId;

    fn id(&self) -> &DoctorId {
        &self.id
    }
}

impl Entity for Patient {
    type Id = PatientId;

    fn id(&self) -> &PatientId {
        &self.id
    }
}

impl Entity for Department {
    type Id = String;

    fn id(&self) -> &String {
        &self.name
    }
}

/// Basic storage operations for one entity type.
///
/// Implementations must be `Send + Sync`; they are shared across tasks.
pub trait Repository<E: Entity>: Send + Sync {
    /// Load by key. `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn get(&self, id: &E::Id) -> RepoFuture<'_, Option<E>>;

    /// Insert or replace.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn save(&self, entity: E) -> RepoFuture<'_, ()>;

    /// Remove by key. Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn delete(&self, id: &E::Id) -> RepoFuture<'_, bool>;

    /// All records, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn list_all(&self) -> RepoFuture<'_, Vec<E>>;
}

/// Schedule storage
pub trait ScheduleRepository: Repository<Schedule> {
    /// Schedules published by a doctor
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn list_by_doctor(&self, doctor_id: &DoctorId) -> RepoFuture<'_, Vec<Schedule>>;
}

/// Reservation storage
pub trait ReservationRepository: Repository<Reservation> {
    /// Reservations held by a patient
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn list_by_patient(&self, patient_id: &PatientId) -> RepoFuture<'_, Vec<Reservation>>;

    /// Reservations with a doctor
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn list_by_doctor(&self, doctor_id: &DoctorId) -> RepoFuture<'_, Vec<Reservation>>;

    /// Reservations taken from a schedule
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn list_by_schedule(&self, schedule_id: &ScheduleId) -> RepoFuture<'_, Vec<Reservation>>;
}

/// Doctor storage
pub trait DoctorRepository: Repository<Doctor> {
    /// Doctors assigned to a department, ordered by id
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn list_by_department(&self, department: &str) -> RepoFuture<'_, Vec<Doctor>>;
}

/// Patient storage
pub trait PatientRepository: Repository<Patient> {}

/// Department storage
pub trait DepartmentRepository: Repository<Department> {}
