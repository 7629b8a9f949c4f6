//! Read-only projections over schedules and reservations.
//!
//! Queries take no schedule lock. Each reads a snapshot from the
//! repositories and may therefore trail an in-flight booking by one unit.

use crate::ledger::ScheduleLedger;
use crate::registry::ReservationRegistry;
use clinic_core::{
    ClinicError, DepartmentRepository, DoctorId, DoctorRepository, NaiveDate, PatientId,
    PatientRepository, Repository, Reservation, ReservationStatus, Result, Schedule, ScheduleId,
    ScheduleStatus, SlotCategory,
};
use serde::Serialize;
use std::sync::Arc;

/// Occupancy of one schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleSummary {
    /// Schedule concerned
    pub schedule_id: ScheduleId,
    /// Owning doctor
    pub doctor_id: DoctorId,
    /// Calendar date
    pub date: NaiveDate,
    /// Time-of-day bucket
    pub category: SlotCategory,
    /// Current status
    pub status: ScheduleStatus,
    /// Bookable units
    pub capacity: u32,
    /// Units booked
    pub booked: u32,
    /// Units free
    pub remaining: u32,
    /// Reservations cancelled so far
    pub cancelled: u32,
    /// Reservations completed so far
    pub completed: u32,
}

/// Read side of the clinic.
pub struct QueryService {
    ledger: Arc<ScheduleLedger>,
    registry: Arc<ReservationRegistry>,
    doctors: Arc<dyn DoctorRepository>,
    patients: Arc<dyn PatientRepository>,
    departments: Arc<dyn DepartmentRepository>,
}

impl QueryService {
    /// Creates a query service
    #[must_use]
    pub fn new(
        ledger: Arc<ScheduleLedger>,
        registry: Arc<ReservationRegistry>,
        doctors: Arc<dyn DoctorRepository>,
        patients: Arc<dyn PatientRepository>,
        departments: Arc<dyn DepartmentRepository>,
    ) -> Self {
        Self {
            ledger,
            registry,
            doctors,
            patients,
            departments,
        }
    }

    /// Bookable schedules of a doctor dated within `from..=to`.
    ///
    /// # Errors
    ///
    /// [`ClinicError::DoctorNotFound`] if the doctor is unknown.
    pub async fn free_slots(
        &self,
        doctor_id: &DoctorId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Schedule>> {
        if self.doctors.get(doctor_id).await?.is_none() {
            return Err(ClinicError::DoctorNotFound(doctor_id.clone()));
        }
        self.ledger.find_free_slots(doctor_id, from, to).await
    }

    /// Bookable schedules of every doctor in a department, ordered by date,
    /// start time, then doctor.
    ///
    /// # Errors
    ///
    /// [`ClinicError::DepartmentNotFound`] if the department is unknown.
    pub async fn department_free_slots(
        &self,
        department: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Schedule>> {
        if self.departments.get(&department.to_string()).await?.is_none() {
            return Err(ClinicError::DepartmentNotFound(department.to_string()));
        }

        let mut slots = Vec::new();
        for doctor in self.doctors.list_by_department(department).await? {
            slots.extend(self.ledger.find_free_slots(&doctor.id, from, to).await?);
        }
        slots.sort_by(|a, b| {
            (a.date, a.start, &a.doctor_id).cmp(&(b.date, b.start, &b.doctor_id))
        });
        Ok(slots)
    }

    /// Every reservation a patient has held, newest visit first.
    ///
    /// # Errors
    ///
    /// [`ClinicError::PatientNotFound`] if the patient is unknown.
    pub async fn patient_history(&self, patient_id: &PatientId) -> Result<Vec<Reservation>> {
        if self.patients.get(patient_id).await?.is_none() {
            return Err(ClinicError::PatientNotFound(patient_id.clone()));
        }

        let mut history = self.registry.list_by_patient(patient_id).await?;
        history.sort_by(|a, b| {
            b.scheduled_at
                .cmp(&a.scheduled_at)
                .then_with(|| b.created_at().cmp(&a.created_at()))
        });
        Ok(history)
    }

    /// Booked reservations of a doctor on `date`, in visit order.
    ///
    /// # Errors
    ///
    /// [`ClinicError::DoctorNotFound`] if the doctor is unknown.
    pub async fn doctor_agenda(&self, doctor_id: &DoctorId, date: NaiveDate) -> Result<Vec<Reservation>> {
        if self.doctors.get(doctor_id).await?.is_none() {
            return Err(ClinicError::DoctorNotFound(doctor_id.clone()));
        }

        let mut agenda: Vec<_> = self
            .registry
            .list_by_doctor(doctor_id)
            .await?
            .into_iter()
            .filter(|r| r.is_booked() && r.scheduled_at.date_naive() == date)
            .collect();
        agenda.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.created_at().cmp(&b.created_at()))
        });
        Ok(agenda)
    }

    /// Occupancy of one schedule.
    ///
    /// # Errors
    ///
    /// [`ClinicError::ScheduleNotFound`] if the schedule is unknown.
    pub async fn schedule_summary(&self, schedule_id: &ScheduleId) -> Result<ScheduleSummary> {
        let schedule = self.ledger.get(schedule_id).await?;
        let reservations = self.registry.list_by_schedule(schedule_id).await?;
        let count = |status| {
            let n = reservations.iter().filter(|r| r.status() == status).count();
            u32::try_from(n).unwrap_or(u32::MAX)
        };

        Ok(ScheduleSummary {
            schedule_id: schedule.id,
            doctor_id: schedule.doctor_id.clone(),
            date: schedule.date,
            category: schedule.category,
            status: schedule.status(),
            capacity: schedule.capacity(),
            booked: schedule.booked(),
            remaining: schedule.remaining(),
            cancelled: count(ReservationStatus::Cancelled),
            completed: count(ReservationStatus::Completed),
        })
    }
}
