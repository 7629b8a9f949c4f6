//! # Clinic
//!
//! Slot allocation for an outpatient clinic: doctors publish schedules with a
//! finite number of bookable units, and patients claim units as
//! reservations.
//!
//! ## Components
//!
//! - [`issuer::IdIssuer`]: collision-free fixed-length numeric identifiers
//! - [`ledger::ScheduleLedger`]: schedules and their capacity accounting
//! - [`registry::ReservationRegistry`]: reservations and status transitions
//! - [`coordinator::BookingCoordinator`]: pairs capacity changes with
//!   reservation changes under a per-schedule lock
//! - [`query::QueryService`]: read-only projections
//! - [`directory::Directory`]: departments, doctors and patients
//! - [`reconcile::Reconciler`]: applies capacity releases that failed after
//!   their cancellation was committed
//!
//! ## Consistency
//!
//! For every schedule, the booked count equals the number of booked or
//! completed reservations referencing it, plus any releases still queued for
//! the reconciler. Only the coordinator writes both sides, and only while
//! holding the schedule's lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! let app = ClinicApp::builder().with_config(Config::from_env()).build()?;
//! let schedule = app.coordinator().publish_schedule(request).await?;
//! let reservation = app.coordinator().book(patient.id, schedule.id).await?;
//! app.coordinator().cancel(reservation.id).await?;
//! ```

pub mod app;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod events;
pub mod issuer;
pub mod ledger;
pub mod query;
pub mod reconcile;
pub mod registry;

pub use app::{ClinicApp, ClinicBuilder, Repositories};
pub use config::{Config, ConfigError};
pub use coordinator::{BookingCoordinator, ScheduleAudit};
pub use directory::{Directory, NewDoctor, NewPatient};
pub use events::EventPublisher;
pub use issuer::{IdGenerator, IdIssuer, RandomDigits};
pub use ledger::{ScheduleGuard, ScheduleLedger, UnitChange};
pub use query::{QueryService, ScheduleSummary};
pub use reconcile::{PendingRelease, PendingReleases, ReconcileReport, Reconciler};
pub use registry::ReservationRegistry;
