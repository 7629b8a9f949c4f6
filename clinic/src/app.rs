//! Application wiring.
//!
//! [`ClinicBuilder`] assembles the services over a set of [`Repositories`]:
//!
//! ```rust,ignore
//! let app = ClinicApp::builder()
//!     .with_config(Config::from_env())
//!     .with_repositories(Repositories::in_memory())
//!     .build()?;
//! let reservation = app.coordinator().book(patient_id, schedule_id).await?;
//! ```

use crate::config::{Config, ConfigError};
use crate::coordinator::BookingCoordinator;
use crate::directory::Directory;
use crate::events::EventPublisher;
use crate::issuer::{IdGenerator, IdIssuer, RandomDigits};
use crate::ledger::ScheduleLedger;
use crate::query::QueryService;
use crate::reconcile::{PendingReleases, Reconciler};
use crate::registry::ReservationRegistry;
use clinic_core::environment::{Clock, SystemClock};
use clinic_core::{
    Department, DepartmentRepository, Doctor, DoctorRepository, Patient, PatientRepository,
    Reservation, ReservationRepository, Schedule, ScheduleRepository,
};
use clinic_runtime::InMemoryRepository;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Storage backends, one per entity
#[derive(Clone)]
pub struct Repositories {
    /// Schedules
    pub schedules: Arc<dyn ScheduleRepository>,
    /// Reservations
    pub reservations: Arc<dyn ReservationRepository>,
    /// Doctors
    pub doctors: Arc<dyn DoctorRepository>,
    /// Patients
    pub patients: Arc<dyn PatientRepository>,
    /// Departments
    pub departments: Arc<dyn DepartmentRepository>,
}

impl Repositories {
    /// Fresh in-memory backends
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            schedules: Arc::new(InMemoryRepository::<Schedule>::new()),
            reservations: Arc::new(InMemoryRepository::<Reservation>::new()),
            doctors: Arc::new(InMemoryRepository::<Doctor>::new()),
            patients: Arc::new(InMemoryRepository::<Patient>::new()),
            departments: Arc::new(InMemoryRepository::<Department>::new()),
        }
    }
}

impl Default for Repositories {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Builder for [`ClinicApp`].
///
/// Every component is optional: configuration defaults to
/// [`Config::default`], the clock to [`SystemClock`], storage to
/// [`Repositories::in_memory`] and identifiers to [`RandomDigits`].
#[derive(Default)]
pub struct ClinicBuilder {
    config: Option<Config>,
    clock: Option<Arc<dyn Clock>>,
    repositories: Option<Repositories>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl ClinicBuilder {
    /// Empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the storage backends
    #[must_use]
    pub fn with_repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = Some(repositories);
        self
    }

    /// Sets the identifier candidate source
    #[must_use]
    pub fn with_id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(generator);
        self
    }

    /// Validates the configuration and wires the services.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn build(self) -> Result<ClinicApp, ConfigError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let repos = self.repositories.unwrap_or_default();
        let generator = self.id_generator.unwrap_or_else(|| Arc::new(RandomDigits));

        let issuer = Arc::new(IdIssuer::new(
            generator,
            Arc::clone(&repos.doctors),
            Arc::clone(&repos.patients),
            Arc::clone(&repos.reservations),
            config.booking.issuance_attempts,
        ));
        let ledger = Arc::new(ScheduleLedger::new(
            Arc::clone(&repos.schedules),
            Arc::clone(&repos.doctors),
            Arc::clone(&clock),
            config.lock_timeout(),
        ));
        let registry = Arc::new(ReservationRegistry::new(
            Arc::clone(&repos.reservations),
            Arc::clone(&issuer),
            Arc::clone(&clock),
        ));
        let events = EventPublisher::new(config.booking.event_buffer);
        let pending = Arc::new(PendingReleases::new());

        let coordinator = BookingCoordinator::new(
            Arc::clone(&ledger),
            Arc::clone(&registry),
            Arc::clone(&repos.patients),
            Arc::clone(&pending),
            events.clone(),
            Arc::clone(&clock),
        );
        let queries = Arc::new(QueryService::new(
            Arc::clone(&ledger),
            Arc::clone(&registry),
            Arc::clone(&repos.doctors),
            Arc::clone(&repos.patients),
            Arc::clone(&repos.departments),
        ));
        let directory = Arc::new(Directory::new(
            Arc::clone(&repos.departments),
            Arc::clone(&repos.doctors),
            Arc::clone(&repos.patients),
            Arc::clone(&issuer),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&ledger),
            Arc::clone(&registry),
            Arc::clone(&pending),
            events,
            clock,
            config.reconcile_policy(),
        ));

        tracing::debug!(?config, "Clinic services wired");
        Ok(ClinicApp {
            config,
            issuer,
            ledger,
            registry,
            coordinator,
            queries,
            directory,
            reconciler,
            pending,
        })
    }
}

/// The assembled clinic services.
#[derive(Clone)]
pub struct ClinicApp {
    config: Config,
    issuer: Arc<IdIssuer>,
    ledger: Arc<ScheduleLedger>,
    registry: Arc<ReservationRegistry>,
    coordinator: BookingCoordinator,
    queries: Arc<QueryService>,
    directory: Arc<Directory>,
    reconciler: Arc<Reconciler>,
    pending: Arc<PendingReleases>,
}

impl ClinicApp {
    /// Starts a [`ClinicBuilder`]
    #[must_use]
    pub fn builder() -> ClinicBuilder {
        ClinicBuilder::new()
    }

    /// Effective configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Identifier issuer
    #[must_use]
    pub fn issuer(&self) -> &IdIssuer {
        &self.issuer
    }

    /// Schedule ledger
    #[must_use]
    pub fn ledger(&self) -> &ScheduleLedger {
        &self.ledger
    }

    /// Reservation registry
    #[must_use]
    pub fn registry(&self) -> &ReservationRegistry {
        &self.registry
    }

    /// Booking coordinator
    #[must_use]
    pub const fn coordinator(&self) -> &BookingCoordinator {
        &self.coordinator
    }

    /// Query service
    #[must_use]
    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    /// Directory
    #[must_use]
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Reconciler, for driving passes by hand
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Deferred releases queue
    #[must_use]
    pub fn pending(&self) -> &PendingReleases {
        &self.pending
    }

    /// Runs the reconciler on the configured interval until `shutdown`
    /// flips to `true`.
    #[must_use]
    pub fn spawn_reconciler(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        Arc::clone(&self.reconciler).spawn(self.config.reconcile_interval(), shutdown)
    }
}
