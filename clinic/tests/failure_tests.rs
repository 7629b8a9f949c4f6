//! Storage failures: compensation, deferred releases and reconciliation

#![allow(clippy::unwrap_used)] // Tests can unwrap

mod common;

use clinic::IdGenerator;
use clinic_core::{
    ClinicError, ClinicEvent, IdKind, Repository, RepositoryError, ReservationStatus,
};
use common::Harness;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn failed_reservation_save_returns_the_unit() {
    let h = Harness::new();
    let schedule = h.schedule(1).await;
    let patient = h.seed_patients(1).await.remove(0);
    h.reservation_faults.fail_next_saves(1);

    let err = h.app.coordinator().book(patient.clone(), schedule.id).await.unwrap_err();
    assert!(matches!(
        err,
        ClinicError::Repository(RepositoryError::Unavailable(_))
    ));
    assert!(err.is_retryable());
    assert_eq!(h.booked(&schedule).await, 0);
    assert!(h.reservations(&schedule).await.is_empty());
    assert!(h.app.pending().is_empty());
    assert_eq!(h.app.issuer().in_flight(), 0);

    // The returned unit is bookable again
    h.app.coordinator().book(patient, schedule.id).await.unwrap();
    assert_eq!(h.booked(&schedule).await, 1);
}

#[tokio::test]
async fn failed_capacity_save_creates_nothing() {
    let h = Harness::new();
    let schedule = h.schedule(2).await;
    let patient = h.seed_patients(1).await.remove(0);
    h.schedule_faults.fail_next_saves(1);

    assert!(h.app.coordinator().book(patient, schedule.id).await.is_err());
    assert_eq!(h.booked(&schedule).await, 0);
    assert!(h.reservations(&schedule).await.is_empty());
}

#[tokio::test]
async fn refused_compensation_defers_the_recount_failure() {
    let h = Harness::new();
    let schedule = h.schedule(2).await;
    let patient = h.seed_patients(1).await.remove(0);
    h.reservation_faults.delay_saves(Duration::from_millis(50));
    h.reservation_faults.fail_next_saves(1);
    h.reservation_faults.fail_next_lists(1);

    let app = h.app.clone();
    let booking = tokio::spawn(async move { app.coordinator().book(patient, schedule.id).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    // Overwrite the taken unit behind the ledger's back so the release is refused
    h.repos.schedules.save(schedule.clone()).await.unwrap();

    assert!(booking.await.unwrap().is_err());
    let pending = h.app.pending().snapshot();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].last_error.contains("injected list failure"));
    assert_eq!(h.booked(&schedule).await, 0);
}

#[tokio::test]
async fn failed_compensation_is_deferred_and_reconciled() {
    let h = Harness::new();
    let mut events = h.app.coordinator().subscribe();
    let schedule = h.schedule(2).await;
    let patient = h.seed_patients(1).await.remove(0);

    // Reserve succeeds, the reservation save fails, then the compensating
    // release fails too
    h.reservation_faults.fail_next_saves(1);
    h.schedule_faults.fail_nth_save(2);
    assert!(h.app.coordinator().book(patient, schedule.id).await.is_err());

    assert_eq!(h.booked(&schedule).await, 1);
    let pending = h.app.coordinator().pending_releases();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].schedule_id, schedule.id);
    assert_eq!(pending[0].reservation_id, None);

    let audit = h.app.coordinator().audit(schedule.id).await.unwrap();
    assert_eq!((audit.booked_count, audit.holding_reservations, audit.pending_releases), (1, 0, 1));
    assert!(!audit.is_settled());

    let report = h.app.reconciler().run_once().await;
    assert_eq!((report.reconciled, report.remaining), (1, 0));
    assert_eq!(h.booked(&schedule).await, 0);
    assert!(h.app.coordinator().audit(schedule.id).await.unwrap().is_settled());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.name());
    }
    assert_eq!(
        seen,
        ["schedule_published", "release_deferred", "release_reconciled"]
    );
}

#[tokio::test]
async fn failed_release_after_cancel_is_deferred_not_dropped() {
    let h = Harness::new();
    let mut events = h.app.coordinator().subscribe();
    let schedule = h.schedule(2).await;
    let patient = h.seed_patients(1).await.remove(0);
    let reservation = h.app.coordinator().book(patient, schedule.id).await.unwrap();

    h.schedule_faults.fail_next_saves(1);
    let cancelled = h.app.coordinator().cancel(reservation.id.clone()).await.unwrap();
    assert_eq!(cancelled.status(), ReservationStatus::Cancelled);

    // Cancellation is durable, the unit is still held
    let stored = h.app.registry().get(&reservation.id).await.unwrap();
    assert_eq!(stored.status(), ReservationStatus::Cancelled);
    assert_eq!(h.booked(&schedule).await, 1);

    let pending = h.app.coordinator().pending_releases();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].reservation_id, Some(reservation.id.clone()));
    assert_eq!(pending[0].attempts, 1);

    let audit = h.app.coordinator().audit(schedule.id).await.unwrap();
    assert_eq!(audit.pending_releases, 1);

    let report = h.app.reconciler().run_once().await;
    assert_eq!(report.reconciled, 1);
    assert!(h.app.pending().is_empty());
    assert_eq!(h.booked(&schedule).await, 0);

    let mut deferred = 0;
    let mut reconciled = None;
    while let Ok(event) = events.try_recv() {
        match event {
            ClinicEvent::ReleaseDeferred { reservation_id, .. } => {
                assert_eq!(reservation_id, Some(reservation.id.clone()));
                deferred += 1;
            }
            ClinicEvent::ReleaseReconciled { attempts, .. } => reconciled = Some(attempts),
            _ => {}
        }
    }
    assert_eq!(deferred, 1);
    assert_eq!(reconciled, Some(2));
}

#[tokio::test]
async fn reconciler_keeps_releases_that_still_fail() {
    let h = Harness::new();
    let schedule = h.schedule(1).await;
    let patient = h.seed_patients(1).await.remove(0);
    let reservation = h.app.coordinator().book(patient, schedule.id).await.unwrap();

    h.schedule_faults.fail_all_saves(true);
    h.app.coordinator().cancel(reservation.id).await.unwrap();

    let report = h.app.reconciler().run_once().await;
    assert_eq!((report.reconciled, report.remaining), (0, 1));
    let pending = h.app.pending().snapshot();
    assert_eq!(pending[0].attempts, 2);
    assert!(pending[0].last_error.contains("injected save failure"));
    assert_eq!(h.booked(&schedule).await, 1);

    h.schedule_faults.clear();
    let report = h.app.reconciler().run_once().await;
    assert_eq!((report.reconciled, report.remaining), (1, 0));
    assert_eq!(h.booked(&schedule).await, 0);
}

#[tokio::test]
async fn audit_counts_a_release_the_reconciler_is_waiting_to_apply() {
    let h = Harness::new();
    let schedule = h.schedule(1).await;
    let patient = h.seed_patients(1).await.remove(0);
    let reservation = h.app.coordinator().book(patient, schedule.id).await.unwrap();
    h.schedule_faults.fail_next_saves(1);
    h.app.coordinator().cancel(reservation.id).await.unwrap();

    // Queue an audit and then a reconciliation pass behind a held lock
    let guard = h.app.ledger().lock(schedule.id).await.unwrap();
    let app = h.app.clone();
    let audit = tokio::spawn(async move { app.coordinator().audit(schedule.id).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let app = h.app.clone();
    let pass = tokio::spawn(async move { app.reconciler().run_once().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(guard);

    let audit = audit.await.unwrap().unwrap();
    assert_eq!(
        (audit.booked_count, audit.holding_reservations, audit.pending_releases),
        (1, 0, 1)
    );
    let report = pass.await.unwrap();
    assert_eq!((report.reconciled, report.remaining), (1, 0));
    assert!(h.app.coordinator().audit(schedule.id).await.unwrap().is_settled());
}

#[tokio::test]
async fn overlapping_passes_apply_a_release_once() {
    let h = Harness::new();
    let schedule = h.schedule(2).await;
    let patients = h.seed_patients(2).await;
    let first = h.app.coordinator().book(patients[0].clone(), schedule.id).await.unwrap();
    h.app.coordinator().book(patients[1].clone(), schedule.id).await.unwrap();
    h.schedule_faults.fail_next_saves(1);
    h.app.coordinator().cancel(first.id).await.unwrap();

    let guard = h.app.ledger().lock(schedule.id).await.unwrap();
    let passes: Vec<_> = (0..2)
        .map(|_| {
            let app = h.app.clone();
            tokio::spawn(async move { app.reconciler().run_once().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(guard);

    let mut reconciled = 0;
    for pass in passes {
        reconciled += pass.await.unwrap().reconciled;
    }
    assert_eq!(reconciled, 1);
    assert_eq!(h.booked(&schedule).await, 1);
    assert!(h.app.coordinator().audit(schedule.id).await.unwrap().is_settled());
}

#[tokio::test]
async fn background_reconciler_drains_the_queue() {
    let mut config = common::fast_config();
    config.reconciler.interval_ms = 10;
    let h = Harness::with_config(config);
    let schedule = h.schedule(1).await;
    let patient = h.seed_patients(1).await.remove(0);
    let reservation = h.app.coordinator().book(patient, schedule.id).await.unwrap();

    h.schedule_faults.fail_next_saves(1);
    h.app.coordinator().cancel(reservation.id).await.unwrap();
    assert_eq!(h.app.pending().len(), 1);

    let (shutdown, signal) = tokio::sync::watch::channel(false);
    let handle = h.app.spawn_reconciler(signal);
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.send(true).unwrap();
    handle.await.unwrap();

    assert!(h.app.pending().is_empty());
    assert_eq!(h.booked(&schedule).await, 0);
}

struct Constant;

impl IdGenerator for Constant {
    fn candidate(&self, kind: IdKind) -> String {
        "1".repeat(kind.digits())
    }
}

#[tokio::test]
async fn exhausted_issuance_is_a_conflict_and_returns_the_unit() {
    let h = Harness::with_generator(Arc::new(Constant));
    let schedule = h.schedule(3).await;
    let patients = h.seed_patients(2).await;

    let first = h.app.coordinator().book(patients[0].clone(), schedule.id).await.unwrap();
    assert_eq!(first.id.as_str(), "111111111111");

    let err = h.app.coordinator().book(patients[1].clone(), schedule.id).await.unwrap_err();
    assert!(matches!(
        err,
        ClinicError::IssuanceConflict {
            kind: IdKind::Reservation,
            attempts: 16
        }
    ));
    assert_eq!(h.booked(&schedule).await, 1);
    assert_eq!(h.reservations(&schedule).await.len(), 1);
}
