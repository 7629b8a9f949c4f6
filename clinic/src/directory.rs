//! Directory of departments, doctors and patients.
//!
//! Department membership lives on the doctor record. Every change to it, and
//! every department deletion, runs under one membership lock so a department
//! cannot be deleted while a doctor is being assigned to it.

use crate::issuer::IdIssuer;
use clinic_core::{
    ClinicError, Department, DepartmentRepository, Doctor, DoctorId, DoctorRepository, IdKind,
    Patient, PatientId, PatientRepository, Repository, Result,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Length of a national identity number
const IDENTITY_LEN: usize = 18;

/// Fields of a doctor being registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDoctor {
    /// Display name
    pub name: String,
    /// Department to join, if any
    pub department: Option<String>,
    /// Free-text specialty
    pub specialty: Option<String>,
}

/// Fields of a patient being registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPatient {
    /// Display name
    pub name: String,
    /// 18-character national identity number
    pub identity_id: String,
    /// Contact phone
    pub phone: String,
}

/// Manages directory records and department membership.
pub struct Directory {
    departments: Arc<dyn DepartmentRepository>,
    doctors: Arc<dyn DoctorRepository>,
    patients: Arc<dyn PatientRepository>,
    issuer: Arc<IdIssuer>,
    membership: Mutex<()>,
}

impl Directory {
    /// Creates a directory issuing identifiers from `issuer`
    #[must_use]
    pub fn new(
        departments: Arc<dyn DepartmentRepository>,
        doctors: Arc<dyn DoctorRepository>,
        patients: Arc<dyn PatientRepository>,
        issuer: Arc<IdIssuer>,
    ) -> Self {
        Self {
            departments,
            doctors,
            patients,
            issuer,
            membership: Mutex::new(()),
        }
    }

    /// Creates a department.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::Validation`] if the name is blank
    /// - [`ClinicError::DuplicateDepartment`] if the name is taken
    pub async fn create_department(&self, name: &str) -> Result<Department> {
        let name = non_blank("department name", name)?;
        let _membership = self.membership.lock().await;

        if self.departments.get(&name).await?.is_some() {
            return Err(ClinicError::DuplicateDepartment(name));
        }
        let department = Department::new(name);
        self.departments.save(department.clone()).await?;
        tracing::info!(department = %department.name, "Department created");
        Ok(department)
    }

    /// Loads a department.
    ///
    /// # Errors
    ///
    /// [`ClinicError::DepartmentNotFound`] if absent.
    pub async fn department(&self, name: &str) -> Result<Department> {
        self.departments
            .get(&name.to_string())
            .await?
            .ok_or_else(|| ClinicError::DepartmentNotFound(name.to_string()))
    }

    /// All departments, ordered by name
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails.
    pub async fn departments(&self) -> Result<Vec<Department>> {
        Ok(self.departments.list_all().await?)
    }

    /// Deletes an empty department.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::DepartmentNotFound`] if absent
    /// - [`ClinicError::DepartmentNotEmpty`] while doctors are assigned
    pub async fn delete_department(&self, name: &str) -> Result<()> {
        let _membership = self.membership.lock().await;
        self.department(name).await?;

        let doctors = self.doctors.list_by_department(name).await?.len();
        if doctors > 0 {
            return Err(ClinicError::DepartmentNotEmpty {
                department: name.to_string(),
                doctors,
            });
        }
        self.departments.delete(&name.to_string()).await?;
        tracing::info!(department = name, "Department deleted");
        Ok(())
    }

    /// Registers a doctor under a newly issued identifier.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::Validation`] if the name is blank
    /// - [`ClinicError::DepartmentNotFound`] if the department is unknown
    /// - [`ClinicError::IssuanceConflict`] if no identifier is free
    pub async fn register_doctor(&self, new: NewDoctor) -> Result<Doctor> {
        let name = non_blank("doctor name", &new.name)?;
        let _membership = self.membership.lock().await;
        if let Some(department) = &new.department {
            self.department(department).await?;
        }

        let doctor = Doctor {
            id: self.issuer.doctor_id().await?,
            name,
            department: new.department,
            specialty: new.specialty,
        };
        let saved = self.doctors.save(doctor.clone()).await;
        self.issuer.settle(IdKind::Doctor, doctor.id.as_str());
        saved?;
        tracing::info!(doctor_id = %doctor.id, department = ?doctor.department, "Doctor registered");
        Ok(doctor)
    }

    /// Loads a doctor.
    ///
    /// # Errors
    ///
    /// [`ClinicError::DoctorNotFound`] if absent.
    pub async fn doctor(&self, doctor_id: &DoctorId) -> Result<Doctor> {
        self.doctors
            .get(doctor_id)
            .await?
            .ok_or_else(|| ClinicError::DoctorNotFound(doctor_id.clone()))
    }

    /// All doctors, ordered by identifier
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails.
    pub async fn doctors(&self) -> Result<Vec<Doctor>> {
        Ok(self.doctors.list_all().await?)
    }

    /// Replaces a doctor's record.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::DoctorNotFound`] if absent
    /// - [`ClinicError::Validation`] if the name is blank
    /// - [`ClinicError::DepartmentNotFound`] if the department is unknown
    pub async fn update_doctor(&self, doctor: Doctor) -> Result<Doctor> {
        non_blank("doctor name", &doctor.name)?;
        let _membership = self.membership.lock().await;
        self.doctor(&doctor.id).await?;
        if let Some(department) = &doctor.department {
            self.department(department).await?;
        }

        self.doctors.save(doctor.clone()).await?;
        tracing::debug!(doctor_id = %doctor.id, "Doctor updated");
        Ok(doctor)
    }

    /// Removes a doctor. Schedules and reservations are kept for the record.
    ///
    /// # Errors
    ///
    /// [`ClinicError::DoctorNotFound`] if absent.
    pub async fn delete_doctor(&self, doctor_id: &DoctorId) -> Result<()> {
        let _membership = self.membership.lock().await;
        if !self.doctors.delete(doctor_id).await? {
            return Err(ClinicError::DoctorNotFound(doctor_id.clone()));
        }
        tracing::info!(%doctor_id, "Doctor deleted");
        Ok(())
    }

    /// Moves a doctor into a department.
    ///
    /// # Errors
    ///
    /// [`ClinicError::DepartmentNotFound`] or [`ClinicError::DoctorNotFound`]
    /// on unknown references.
    pub async fn assign(&self, department: &str, doctor_id: &DoctorId) -> Result<Doctor> {
        let _membership = self.membership.lock().await;
        self.department(department).await?;
        let mut doctor = self.doctor(doctor_id).await?;

        doctor.department = Some(department.to_string());
        self.doctors.save(doctor.clone()).await?;
        tracing::info!(%doctor_id, department, "Doctor assigned");
        Ok(doctor)
    }

    /// Removes a doctor from their department, if any.
    ///
    /// # Errors
    ///
    /// [`ClinicError::DoctorNotFound`] if absent.
    pub async fn unassign(&self, doctor_id: &DoctorId) -> Result<Doctor> {
        let _membership = self.membership.lock().await;
        let mut doctor = self.doctor(doctor_id).await?;

        if let Some(previous) = doctor.department.take() {
            self.doctors.save(doctor.clone()).await?;
            tracing::info!(%doctor_id, department = %previous, "Doctor unassigned");
        }
        Ok(doctor)
    }

    /// Doctors of a department, ordered by identifier.
    ///
    /// # Errors
    ///
    /// [`ClinicError::DepartmentNotFound`] if absent.
    pub async fn doctors_in(&self, department: &str) -> Result<Vec<Doctor>> {
        self.department(department).await?;
        Ok(self.doctors.list_by_department(department).await?)
    }

    /// Registers a patient under a newly issued identifier.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::Validation`] if the name or phone is blank, or the
    ///   identity number is malformed
    /// - [`ClinicError::IssuanceConflict`] if no identifier is free
    pub async fn register_patient(&self, new: NewPatient) -> Result<Patient> {
        let name = non_blank("patient name", &new.name)?;
        let identity_id = identity_number(&new.identity_id)?;
        let phone = non_blank("phone", &new.phone)?;

        let patient = Patient {
            id: self.issuer.patient_id().await?,
            name,
            identity_id,
            phone,
        };
        let saved = self.patients.save(patient.clone()).await;
        self.issuer.settle(IdKind::Patient, patient.id.as_str());
        saved?;
        tracing::info!(patient_id = %patient.id, "Patient registered");
        Ok(patient)
    }

    /// Loads a patient.
    ///
    /// # Errors
    ///
    /// [`ClinicError::PatientNotFound`] if absent.
    pub async fn patient(&self, patient_id: &PatientId) -> Result<Patient> {
        self.patients
            .get(patient_id)
            .await?
            .ok_or_else(|| ClinicError::PatientNotFound(patient_id.clone()))
    }

    /// All patients, ordered by identifier
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails.
    pub async fn patients(&self) -> Result<Vec<Patient>> {
        Ok(self.patients.list_all().await?)
    }

    /// Replaces a patient's record.
    ///
    /// # Errors
    ///
    /// [`ClinicError::PatientNotFound`] if absent, [`ClinicError::Validation`]
    /// on malformed fields.
    pub async fn update_patient(&self, patient: Patient) -> Result<Patient> {
        self.patient(&patient.id).await?;
        let patient = Patient {
            name: non_blank("patient name", &patient.name)?,
            identity_id: identity_number(&patient.identity_id)?,
            phone: non_blank("phone", &patient.phone)?,
            ..patient
        };
        self.patients.save(patient.clone()).await?;
        tracing::debug!(patient_id = %patient.id, "Patient updated");
        Ok(patient)
    }

    /// Removes a patient. Their reservations are kept for the record.
    ///
    /// # Errors
    ///
    /// [`ClinicError::PatientNotFound`] if absent.
    pub async fn delete_patient(&self, patient_id: &PatientId) -> Result<()> {
        if !self.patients.delete(patient_id).await? {
            return Err(ClinicError::PatientNotFound(patient_id.clone()));
        }
        tracing::info!(%patient_id, "Patient deleted");
        Ok(())
    }
}

fn non_blank(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ClinicError::Validation(format!("{field} must not be blank")));
    }
    Ok(trimmed.to_string())
}

/// 17 digits followed by a digit or `X` check character
fn identity_number(value: &str) -> Result<String> {
    let value = value.trim().to_ascii_uppercase();
    let well_formed = value.len() == IDENTITY_LEN
        && value.bytes().take(IDENTITY_LEN - 1).all(|b| b.is_ascii_digit())
        && value
            .bytes()
            .last()
            .is_some_and(|b| b.is_ascii_digit() || b == b'X');

    if well_formed {
        Ok(value)
    } else {
        Err(ClinicError::Validation(format!(
            "identity number must be {IDENTITY_LEN} characters (17 digits and a check digit or X), got {value:?}"
        )))
    }
}
