//! Shared harness for the clinic integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use clinic::{ClinicApp, Config, IdGenerator, Repositories};
use clinic_core::environment::Clock;
use clinic_core::{Doctor, PatientId, Repository, Reservation, Schedule};
use clinic_runtime::InMemoryRepository;
use clinic_testing::{Faults, FlakyRepository, ManualClock, fixtures, init_test_tracing, test_clock};
use std::sync::Arc;

/// An app over in-memory storage whose schedule and reservation stores can
/// be told to fail, driven by a manual clock starting at 2025-01-01.
pub struct Harness {
    pub app: ClinicApp,
    pub clock: ManualClock,
    pub repos: Repositories,
    pub schedule_faults: Faults,
    pub reservation_faults: Faults,
}

/// Defaults with a short lock timeout and near-instant reconciler backoff
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.booking.lock_timeout_ms = 200;
    config.reconciler.initial_backoff_ms = 1;
    config.reconciler.max_backoff_ms = 5;
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::build(fast_config(), None)
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, None)
    }

    pub fn with_generator(generator: Arc<dyn IdGenerator>) -> Self {
        Self::build(fast_config(), Some(generator))
    }

    fn build(config: Config, generator: Option<Arc<dyn IdGenerator>>) -> Self {
        init_test_tracing();

        let (schedules, schedule_faults) =
            FlakyRepository::new(InMemoryRepository::<Schedule>::new());
        let (reservations, reservation_faults) =
            FlakyRepository::new(InMemoryRepository::<Reservation>::new());
        let repos = Repositories {
            schedules: Arc::new(schedules),
            reservations: Arc::new(reservations),
            ..Repositories::in_memory()
        };
        let clock = ManualClock::new(test_clock().now());

        let mut builder = ClinicApp::builder()
            .with_config(config)
            .with_clock(Arc::new(clock.clone()))
            .with_repositories(repos.clone());
        if let Some(generator) = generator {
            builder = builder.with_id_generator(generator);
        }

        Self {
            app: builder.build().unwrap(),
            clock,
            repos,
            schedule_faults,
            reservation_faults,
        }
    }

    /// Stores fixture doctor `n`
    pub async fn seed_doctor(&self, n: u32) -> Doctor {
        let doctor = fixtures::doctor(n);
        self.repos.doctors.save(doctor.clone()).await.unwrap();
        doctor
    }

    /// Stores fixture patients `1..=count`
    pub async fn seed_patients(&self, count: u32) -> Vec<PatientId> {
        let mut ids = Vec::new();
        for n in 1..=count {
            let patient = fixtures::patient(n);
            ids.push(patient.id.clone());
            self.repos.patients.save(patient).await.unwrap();
        }
        ids
    }

    /// Morning schedule of doctor 1 on the visit date
    pub async fn schedule(&self, capacity: u32) -> Schedule {
        let doctor = self.seed_doctor(1).await;
        self.app
            .coordinator()
            .publish_schedule(
                fixtures::morning_request(&doctor.id, fixtures::visit_date()).with_capacity(capacity),
            )
            .await
            .unwrap()
    }

    /// Booked count as stored
    pub async fn booked(&self, schedule: &Schedule) -> u32 {
        self.app.ledger().get(&schedule.id).await.unwrap().booked()
    }

    /// Reservations stored against a schedule
    pub async fn reservations(&self, schedule: &Schedule) -> Vec<Reservation> {
        self.app.registry().list_by_schedule(&schedule.id).await.unwrap()
    }
}
