//! Directory records: departments, doctors and patients.
//!
//! Field formats (name lengths, phone patterns) are checked by the
//! validation layer before records reach the core. Department membership is
//! a relation held on the doctor (`Doctor::department`) and resolved through
//! the doctor repository, not a collection embedded in the department.

use crate::error::ClinicError;
use crate::ids::{DoctorId, PatientId};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A clinical department, keyed by name
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    /// Unique department name
    pub name: String,
}

impl Department {
    /// Creates a department record
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A doctor who may publish schedules
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    /// Issued identifier
    pub id: DoctorId,
    /// Display name
    pub name: String,
    /// Department the doctor belongs to, if assigned
    pub department: Option<String>,
    /// Free-text specialty
    pub specialty: Option<String>,
}

/// Biological sex as encoded in the national identity number
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    /// Odd 17th digit
    Male,
    /// Even 17th digit
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Male => "M",
            Self::Female => "F",
        })
    }
}

/// A patient who may hold reservations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    /// Issued identifier
    pub id: PatientId,
    /// Display name
    pub name: String,
    /// 18-character national identity number
    pub identity_id: String,
    /// Contact phone
    pub phone: String,
}

impl Patient {
    /// Gender from the parity of the 17th identity digit.
    ///
    /// # Errors
    ///
    /// [`ClinicError::Validation`] if the identity number is too short or the
    /// 17th character is not a digit.
    pub fn gender(&self) -> Result<Gender, ClinicError> {
        let digit = self
            .identity_id
            .as_bytes()
            .get(16)
            .filter(|b| b.is_ascii_digit())
            .map(|b| b - b'0')
            .ok_or_else(|| self.identity_error("no gender digit"))?;

        Ok(if digit % 2 == 0 {
            Gender::Female
        } else {
            Gender::Male
        })
    }

    /// Birth date from identity characters 7 to 14 (`yyyyMMdd`).
    ///
    /// # Errors
    ///
    /// [`ClinicError::Validation`] if that span is missing or not a real date.
    pub fn birth_date(&self) -> Result<NaiveDate, ClinicError> {
        let span = self
            .identity_id
            .get(6..14)
            .ok_or_else(|| self.identity_error("no birth date"))?;
        NaiveDate::parse_from_str(span, "%Y%m%d")
            .map_err(|e| self.identity_error(&format!("invalid birth date {span:?}: {e}")))
    }

    /// Age in whole years on `date`.
    ///
    /// # Errors
    ///
    /// [`ClinicError::Validation`] if the birth date cannot be derived or lies
    /// after `date`.
    pub fn age_on(&self, date: NaiveDate) -> Result<u32, ClinicError> {
        let birth = self.birth_date()?;
        if birth > date {
            return Err(self.identity_error("birth date is in the future"));
        }

        let mut years = date.year() - birth.year();
        if (date.month(), date.day()) < (birth.month(), birth.day()) {
            years -= 1;
        }
        u32::try_from(years).map_err(|_| self.identity_error("negative age"))
    }

    fn identity_error(&self, reason: &str) -> ClinicError {
        ClinicError::Validation(format!("patient {}: {reason}", self.id))
    }
}
