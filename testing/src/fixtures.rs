//! Fixtures shared by the test suites.
//!
//! Dates are relative to [`test_clock`](crate::test_clock) (2025-01-01):
//! [`visit_date`] is the day after, so schedules built from these fixtures
//! are neither in the past nor already started.

#![allow(clippy::expect_used)] // Fixture inputs are hardcoded and valid
#![allow(clippy::missing_panics_doc)]

use chrono::{NaiveDate, NaiveTime};
use clinic_core::{Doctor, DoctorId, Patient, PatientId, ScheduleRequest, SlotCategory};

/// Day after the test clock's date
#[must_use]
pub fn visit_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 2).expect("valid date")
}

/// `h:00`
#[must_use]
pub fn hour(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).expect("valid hour")
}

/// Doctor id `1000000n`
#[must_use]
pub fn doctor_id(n: u32) -> DoctorId {
    DoctorId::parse(format!("{:08}", 10_000_000 + n)).expect("8 digits")
}

/// Patient id `100000000n`
#[must_use]
pub fn patient_id(n: u32) -> PatientId {
    PatientId::parse(format!("{:010}", 1_000_000_000_u64 + u64::from(n))).expect("10 digits")
}

/// A doctor with no department
#[must_use]
pub fn doctor(n: u32) -> Doctor {
    Doctor {
        id: doctor_id(n),
        name: format!("Doctor {n}"),
        department: None,
        specialty: Some("General practice".to_string()),
    }
}

/// A patient born 1990-03-07 (male)
#[must_use]
pub fn patient(n: u32) -> Patient {
    Patient {
        id: patient_id(n),
        name: format!("Patient {n}"),
        identity_id: "110101199003071234".to_string(),
        phone: "13800000000".to_string(),
    }
}

/// 09:00-12:00 morning schedule with the default capacity
#[must_use]
pub fn morning_request(doctor_id: &DoctorId, date: NaiveDate) -> ScheduleRequest {
    ScheduleRequest::new(
        doctor_id.clone(),
        date,
        hour(9),
        hour(12),
        SlotCategory::Morning,
    )
}

/// 14:00-17:00 afternoon schedule with the default capacity
#[must_use]
pub fn afternoon_request(doctor_id: &DoctorId, date: NaiveDate) -> ScheduleRequest {
    ScheduleRequest::new(
        doctor_id.clone(),
        date,
        hour(14),
        hour(17),
        SlotCategory::Afternoon,
    )
}
