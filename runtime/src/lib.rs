//! # Clinic Runtime
//!
//! Infrastructure the clinic services run on:
//!
//! - [`locks`]: keyed async locks with a bounded wait, one per schedule
//! - [`retry`]: exponential backoff for retryable failures
//! - [`metrics`]: Prometheus metric descriptions and recorders
//! - [`memory`]: in-memory repository backend
//!
//! Nothing here knows about booking rules; those live in the `clinic` crate.

pub mod locks;
pub mod memory;
pub mod metrics;
pub mod retry;

pub use locks::{KeyGuard, KeyedLocks, LockTimeout};
pub use memory::InMemoryRepository;
pub use metrics::{MetricsError, MetricsRecorder};
pub use retry::{RetryPolicy, retry_with_predicate};
