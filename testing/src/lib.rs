//! # Clinic Testing
//!
//! Testing utilities for the clinic services.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - Fault-injecting repository wrappers ([`FlakyRepository`])
//! - Fixtures for doctors, patients and schedule requests
//! - proptest strategies for domain values
//!
//! ## Example
//!
//! ```
//! use clinic_core::environment::Clock;
//! use clinic_testing::{fixtures, test_clock};
//!
//! let clock = test_clock();
//! let request = fixtures::morning_request(&fixtures::doctor_id(1), fixtures::visit_date());
//! assert!(request.validate(clock.today()).is_ok());
//! ```

use chrono::{DateTime, Utc};
use clinic_core::environment::Clock;

pub mod faults;
pub mod fixtures;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use clinic_testing::mocks::FixedClock;
    /// use clinic_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to. Clones share the same time.
    ///
    /// ```
    /// use clinic_testing::mocks::ManualClock;
    /// use clinic_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::hours(2));
    /// assert_eq!(clock.now(), start + Duration::hours(2));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing strategies for domain values.
pub mod properties {
    use clinic_core::SlotCategory;
    use proptest::prelude::*;

    /// Any slot category
    pub fn slot_category() -> impl Strategy<Value = SlotCategory> {
        prop::sample::select(SlotCategory::ALL.to_vec())
    }

    /// Small positive capacities, where contention is interesting
    pub fn small_capacity() -> impl Strategy<Value = u32> {
        1_u32..=8
    }

    /// Strings that are not valid numeric ids of `len` digits
    pub fn malformed_id(len: usize) -> impl Strategy<Value = String> {
        "[0-9a-z]{0,14}".prop_filter("must not be a valid id", move |s| {
            !clinic_core::ids::is_fixed_digits(s, len)
        })
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinic=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub use faults::{Faults, FlakyRepository};
pub use mocks::{FixedClock, ManualClock, test_clock};
