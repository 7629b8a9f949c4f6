//! Read projections

#![allow(clippy::unwrap_used)] // Tests can unwrap

mod common;

use chrono::Duration;
use clinic::NewDoctor;
use clinic_core::{ClinicError, ScheduleStatus, SlotCategory};
use clinic_testing::fixtures;
use common::Harness;

#[tokio::test]
async fn free_slots_skip_full_schedules() {
    let h = Harness::new();
    let morning = h.schedule(1).await;
    let doctor = fixtures::doctor_id(1);
    let afternoon = h
        .app
        .coordinator()
        .publish_schedule(fixtures::afternoon_request(&doctor, fixtures::visit_date()))
        .await
        .unwrap();
    let later = h
        .app
        .coordinator()
        .publish_schedule(fixtures::morning_request(
            &doctor,
            fixtures::visit_date() + Duration::days(7),
        ))
        .await
        .unwrap();
    let patient = h.seed_patients(1).await.remove(0);
    let queries = h.app.queries();
    let day = fixtures::visit_date();

    let free = queries.free_slots(&doctor, day, day).await.unwrap();
    assert_eq!(
        free.iter().map(|s| s.id).collect::<Vec<_>>(),
        [morning.id, afternoon.id]
    );

    h.app.coordinator().book(patient, morning.id).await.unwrap();
    let free = queries.free_slots(&doctor, day, day).await.unwrap();
    assert_eq!(free.iter().map(|s| s.id).collect::<Vec<_>>(), [afternoon.id]);

    let week = queries
        .free_slots(&doctor, day, day + Duration::days(7))
        .await
        .unwrap();
    assert_eq!(week.len(), 2);
    assert_eq!(week[1].id, later.id);

    assert!(matches!(
        queries.free_slots(&fixtures::doctor_id(9), day, day).await,
        Err(ClinicError::DoctorNotFound(_))
    ));
}

#[tokio::test]
async fn free_slots_skip_schedules_already_started() {
    let h = Harness::new();
    let morning = h.schedule(4).await;
    let day = fixtures::visit_date();
    let afternoon = h
        .app
        .coordinator()
        .publish_schedule(fixtures::afternoon_request(&fixtures::doctor_id(1), day))
        .await
        .unwrap();

    h.clock.set(morning.starts_at() + Duration::minutes(30));
    let free = h
        .app
        .queries()
        .free_slots(&fixtures::doctor_id(1), day, day)
        .await
        .unwrap();
    assert_eq!(free.iter().map(|s| s.id).collect::<Vec<_>>(), [afternoon.id]);
}

#[tokio::test]
async fn department_free_slots_span_its_doctors() {
    let h = Harness::new();
    let directory = h.app.directory();
    directory.create_department("Pediatrics").await.unwrap();
    directory.create_department("Dermatology").await.unwrap();

    let mut doctors = Vec::new();
    for (name, department) in [("Dr. A", "Pediatrics"), ("Dr. B", "Pediatrics"), ("Dr. C", "Dermatology")] {
        doctors.push(
            directory
                .register_doctor(NewDoctor {
                    name: name.to_string(),
                    department: Some(department.to_string()),
                    specialty: None,
                })
                .await
                .unwrap(),
        );
    }

    let day = fixtures::visit_date();
    let coordinator = h.app.coordinator();
    let a_afternoon = coordinator
        .publish_schedule(fixtures::afternoon_request(&doctors[0].id, day))
        .await
        .unwrap();
    let b_morning = coordinator
        .publish_schedule(fixtures::morning_request(&doctors[1].id, day))
        .await
        .unwrap();
    coordinator
        .publish_schedule(fixtures::morning_request(&doctors[2].id, day))
        .await
        .unwrap();

    let slots = h
        .app
        .queries()
        .department_free_slots("Pediatrics", day, day)
        .await
        .unwrap();
    assert_eq!(
        slots.iter().map(|s| s.id).collect::<Vec<_>>(),
        [b_morning.id, a_afternoon.id]
    );
    assert!(matches!(
        h.app.queries().department_free_slots("Surgery", day, day).await,
        Err(ClinicError::DepartmentNotFound(_))
    ));
}

#[tokio::test]
async fn patient_history_is_newest_first() {
    let h = Harness::new();
    let morning = h.schedule(3).await;
    let afternoon = h
        .app
        .coordinator()
        .publish_schedule(fixtures::afternoon_request(
            &fixtures::doctor_id(1),
            fixtures::visit_date(),
        ))
        .await
        .unwrap();
    let patient = h.seed_patients(1).await.remove(0);

    let first = h.app.coordinator().book(patient.clone(), morning.id).await.unwrap();
    let second = h.app.coordinator().book(patient.clone(), afternoon.id).await.unwrap();
    h.app.coordinator().cancel(first.id.clone()).await.unwrap();

    let history = h.app.queries().patient_history(&patient).await.unwrap();
    assert_eq!(
        history.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        [second.id, first.id]
    );
    assert!(matches!(
        h.app.queries().patient_history(&fixtures::patient_id(50)).await,
        Err(ClinicError::PatientNotFound(_))
    ));
}

#[tokio::test]
async fn doctor_agenda_lists_booked_visits_in_order() {
    let h = Harness::new();
    let morning = h.schedule(3).await;
    let day = fixtures::visit_date();
    let afternoon = h
        .app
        .coordinator()
        .publish_schedule(fixtures::afternoon_request(&fixtures::doctor_id(1), day))
        .await
        .unwrap();
    let patients = h.seed_patients(3).await;
    let coordinator = h.app.coordinator();

    let late = coordinator.book(patients[0].clone(), afternoon.id).await.unwrap();
    let early = coordinator.book(patients[1].clone(), morning.id).await.unwrap();
    let dropped = coordinator.book(patients[2].clone(), morning.id).await.unwrap();
    coordinator.cancel(dropped.id).await.unwrap();

    let agenda = h
        .app
        .queries()
        .doctor_agenda(&fixtures::doctor_id(1), day)
        .await
        .unwrap();
    assert_eq!(
        agenda.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        [early.id, late.id]
    );

    let next_day = h
        .app
        .queries()
        .doctor_agenda(&fixtures::doctor_id(1), day + Duration::days(1))
        .await
        .unwrap();
    assert!(next_day.is_empty());
}

#[tokio::test]
async fn schedule_summary_counts_every_status() {
    let h = Harness::new();
    let schedule = h.schedule(4).await;
    let patients = h.seed_patients(3).await;
    let coordinator = h.app.coordinator();

    let mut reservations = Vec::new();
    for patient in &patients {
        reservations.push(coordinator.book(patient.clone(), schedule.id).await.unwrap());
    }
    coordinator.cancel(reservations[0].id.clone()).await.unwrap();
    coordinator.complete(reservations[1].id.clone()).await.unwrap();

    let summary = h.app.queries().schedule_summary(&schedule.id).await.unwrap();
    assert_eq!(summary.category, SlotCategory::Morning);
    assert_eq!(summary.status, ScheduleStatus::Normal);
    assert_eq!(
        (summary.capacity, summary.booked, summary.remaining),
        (4, 2, 2)
    );
    assert_eq!((summary.cancelled, summary.completed), (1, 1));

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["status"], "normal");
    assert_eq!(json["remaining"], 2);
}
