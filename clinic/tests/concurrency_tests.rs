//! Contention on a single schedule and concurrent identifier issuance

#![allow(clippy::unwrap_used)] // Tests can unwrap

mod common;

use clinic_core::{ClinicError, ReservationId};
use clinic_testing::properties::small_capacity;
use common::{Harness, fast_config};
use proptest::prelude::*;
use std::collections::HashSet;
use std::time::Duration;

/// Books `capacity + extra` patients against one schedule in parallel and
/// returns (successes, full rejections, booked count, reservations holding a unit).
async fn race(
    capacity: u32,
    extra: u32,
    jitter_us: Vec<u64>,
) -> Result<(u32, u32, u32, u32), ClinicError> {
    let h = Harness::new();
    let schedule = h.schedule(capacity).await;
    let patients = h.seed_patients(capacity + extra).await;

    let mut tasks = Vec::new();
    for (i, patient) in patients.into_iter().enumerate() {
        let coordinator = h.app.coordinator().clone();
        let delay = Duration::from_micros(jitter_us[i % jitter_us.len()]);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            coordinator.book(patient, schedule.id).await
        }));
    }

    let (mut booked, mut full) = (0, 0);
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => booked += 1,
            Err(ClinicError::ScheduleFull { .. }) => full += 1,
            Err(other) => return Err(other),
        }
    }

    let audit = h.app.coordinator().audit(schedule.id).await?;
    Ok((booked, full, audit.booked_count, audit.holding_reservations))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn parallel_bookers_fill_capacity_exactly(
        capacity in small_capacity(),
        extra in 1_u32..6,
        jitter_us in prop::collection::vec(0_u64..400, 1..16),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        let outcome = runtime.block_on(race(capacity, extra, jitter_us));
        prop_assert!(outcome.is_ok(), "unexpected failure: {:?}", outcome);
        let (booked, full, booked_count, holding_reservations) = outcome.unwrap();

        prop_assert_eq!(booked, capacity);
        prop_assert_eq!(full, extra);
        prop_assert_eq!(booked_count, capacity);
        prop_assert_eq!(holding_reservations, capacity);
    }
}

/// What a booker does with its reservation once it has one
#[derive(Debug, Clone, Copy)]
enum FollowUp {
    Keep,
    Cancel,
    Complete,
}

fn follow_up() -> impl Strategy<Value = FollowUp> {
    prop_oneof![
        Just(FollowUp::Keep),
        Just(FollowUp::Cancel),
        Just(FollowUp::Complete),
    ]
}

#[derive(Debug, Default)]
struct Churn {
    full: u32,
    kept: u32,
    cancelled: u32,
    completed: u32,
    booked_count: u32,
    remaining: u32,
    settled: bool,
}

/// Books `capacity + extra` patients in parallel, each cancelling or
/// completing its reservation after a jittered pause while the others are
/// still booking.
async fn churn(
    capacity: u32,
    extra: u32,
    plan: Vec<(u64, FollowUp)>,
) -> Result<Churn, ClinicError> {
    let h = Harness::new();
    let schedule = h.schedule(capacity).await;
    let patients = h.seed_patients(capacity + extra).await;

    let mut tasks = Vec::new();
    for (i, patient) in patients.into_iter().enumerate() {
        let coordinator = h.app.coordinator().clone();
        let (jitter_us, follow) = plan[i % plan.len()];
        let delay = Duration::from_micros(jitter_us);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let reservation = match coordinator.book(patient, schedule.id).await {
                Ok(reservation) => reservation,
                Err(ClinicError::ScheduleFull { .. }) => return Ok(None),
                Err(other) => return Err(other),
            };
            tokio::time::sleep(delay / 2).await;
            match follow {
                FollowUp::Keep => {}
                FollowUp::Cancel => {
                    coordinator.cancel(reservation.id).await?;
                }
                FollowUp::Complete => {
                    coordinator.complete(reservation.id).await?;
                }
            }
            Ok::<_, ClinicError>(Some(follow))
        }));
    }

    let mut churn = Churn::default();
    for task in tasks {
        match task.await.unwrap()? {
            None => churn.full += 1,
            Some(FollowUp::Keep) => churn.kept += 1,
            Some(FollowUp::Cancel) => churn.cancelled += 1,
            Some(FollowUp::Complete) => churn.completed += 1,
        }
    }

    let audit = h.app.coordinator().audit(schedule.id).await?;
    churn.booked_count = audit.booked_count;
    churn.settled = audit.is_settled();
    churn.remaining = h.app.ledger().get(&schedule.id).await?.remaining();
    Ok(churn)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn cancel_and_complete_racing_bookings_keep_counts_consistent(
        capacity in small_capacity(),
        extra in 1_u32..6,
        plan in prop::collection::vec((0_u64..400, follow_up()), 1..16),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        let outcome = runtime.block_on(churn(capacity, extra, plan));
        prop_assert!(outcome.is_ok(), "unexpected failure: {:?}", outcome);
        let churn = outcome.unwrap();

        prop_assert!(churn.settled);
        prop_assert!(churn.booked_count <= capacity);
        prop_assert_eq!(churn.booked_count, churn.kept + churn.completed);
        prop_assert_eq!(churn.remaining, capacity - churn.booked_count);
        prop_assert_eq!(
            churn.full + churn.kept + churn.cancelled + churn.completed,
            capacity + extra
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn ten_thousand_concurrent_reservation_ids_are_distinct() {
    let h = Harness::new();

    let tasks: Vec<_> = (0..10_000)
        .map(|_| {
            let app = h.app.clone();
            tokio::spawn(async move { app.issuer().reservation_id().await })
        })
        .collect();

    let mut ids: HashSet<ReservationId> = HashSet::new();
    for task in tasks {
        let id = task.await.unwrap().unwrap();
        assert_eq!(id.as_str().len(), 12);
        assert!(!id.as_str().starts_with('0'));
        ids.insert(id);
    }
    assert_eq!(ids.len(), 10_000);
}

#[tokio::test]
async fn held_lock_reports_busy_until_released() {
    let mut config = fast_config();
    config.booking.lock_timeout_ms = 30;
    let h = Harness::with_config(config);
    let schedule = h.schedule(2).await;
    let patient = h.seed_patients(1).await.remove(0);

    let guard = h.app.ledger().lock(schedule.id).await.unwrap();
    let err = h.app.coordinator().book(patient.clone(), schedule.id).await.unwrap_err();
    assert!(matches!(err, ClinicError::Busy { waited_ms, .. } if waited_ms >= 30));
    assert!(err.is_retryable());
    assert_eq!(h.booked(&schedule).await, 0);

    drop(guard);
    h.app.coordinator().book(patient, schedule.id).await.unwrap();
    assert_eq!(h.booked(&schedule).await, 1);
}

#[tokio::test]
async fn other_schedules_do_not_wait_for_a_held_lock() {
    let mut config = fast_config();
    config.booking.lock_timeout_ms = 30;
    let h = Harness::with_config(config);
    let morning = h.schedule(2).await;
    let afternoon = h
        .app
        .coordinator()
        .publish_schedule(clinic_testing::fixtures::afternoon_request(
            &clinic_testing::fixtures::doctor_id(1),
            clinic_testing::fixtures::visit_date(),
        ))
        .await
        .unwrap();
    let patient = h.seed_patients(1).await.remove(0);

    let _guard = h.app.ledger().lock(morning.id).await.unwrap();
    h.app.coordinator().book(patient, afternoon.id).await.unwrap();
    assert_eq!(h.booked(&afternoon).await, 1);
}

#[tokio::test]
async fn dropped_caller_does_not_interrupt_a_booking() {
    let h = Harness::new();
    let schedule = h.schedule(2).await;
    let patient = h.seed_patients(1).await.remove(0);
    h.reservation_faults.delay_saves(Duration::from_millis(100));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        h.app.coordinator().book(patient.clone(), schedule.id),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let reservations = h.reservations(&schedule).await;
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].patient_id, patient);
    assert_eq!(h.booked(&schedule).await, 1);
    assert!(h.app.coordinator().audit(schedule.id).await.unwrap().is_settled());
}

#[tokio::test]
async fn dropped_caller_does_not_interrupt_a_compensation() {
    let h = Harness::new();
    let schedule = h.schedule(2).await;
    let patient = h.seed_patients(1).await.remove(0);
    h.reservation_faults.delay_saves(Duration::from_millis(100));
    h.reservation_faults.fail_next_saves(1);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        h.app.coordinator().book(patient, schedule.id),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.reservations(&schedule).await.is_empty());
    assert_eq!(h.booked(&schedule).await, 0);
}
