//! Identifier value objects.
//!
//! Doctors, patients and reservations carry fixed-length all-numeric
//! identifiers issued by the clinic. Schedules are keyed by a UUID.

use crate::error::ClinicError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kinds of issued numeric identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKind {
    /// 8 digits
    Doctor,
    /// 10 digits
    Patient,
    /// 12 digits
    Reservation,
}

impl IdKind {
    /// Number of digits an identifier of this kind has
    #[must_use]
    pub const fn digits(self) -> usize {
        match self {
            Self::Doctor => 8,
            Self::Patient => 10,
            Self::Reservation => 12,
        }
    }

    /// Lowercase name used in logs and metric labels
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Doctor => "doctor",
            Self::Patient => "patient",
            Self::Reservation => "reservation",
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `true` when `value` is exactly `len` ASCII digits.
#[must_use]
pub fn is_fixed_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Identifier kind (and therefore length) of this type
            pub const KIND: IdKind = $kind;

            /// Parses an identifier, checking only length and digits.
            ///
            /// # Errors
            ///
            /// Returns [`ClinicError::Validation`] if `value` is not exactly
            /// the expected number of ASCII digits.
            pub fn parse(value: impl Into<String>) -> Result<Self, ClinicError> {
                let value = value.into();
                if is_fixed_digits(&value, Self::KIND.digits()) {
                    Ok(Self(value))
                } else {
                    Err(ClinicError::Validation(format!(
                        "{} id must be {} digits, got {value:?}",
                        Self::KIND,
                        Self::KIND.digits()
                    )))
                }
            }

            /// Borrow the digits
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ClinicError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ClinicError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

numeric_id!(
    /// Doctor identifier (8 digits)
    DoctorId,
    IdKind::Doctor
);

numeric_id!(
    /// Patient identifier (10 digits)
    PatientId,
    IdKind::Patient
);

numeric_id!(
    /// Reservation number (12 digits)
    ReservationId,
    IdKind::Reservation
);

/// Unique identifier for a schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleId(Uuid);

impl ScheduleId {
    /// Creates a new random `ScheduleId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ScheduleId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScheduleId {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ClinicError::Validation(format!("invalid schedule id {s:?}: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_length_digits() {
        assert_eq!(DoctorId::parse("12345678").unwrap().as_str(), "12345678");
        assert!(PatientId::parse("0123456789").is_ok());
        assert!(ReservationId::parse("202501010001").is_ok());
    }

    #[test]
    fn rejects_wrong_length_or_non_digits() {
        assert!(matches!(DoctorId::parse("1234567"), Err(ClinicError::Validation(_))));
        assert!(matches!(DoctorId::parse("1234567a"), Err(ClinicError::Validation(_))));
        assert!(PatientId::parse("12345678").is_err());
        assert!(ReservationId::parse("").is_err());
        // Non-ASCII digits are not accepted even if numeric
        assert!(DoctorId::parse("１２３４５６７８").is_err());
    }

    #[test]
    fn serde_round_trip_validates() {
        let id = PatientId::parse("1000000001").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"1000000001\"");
        assert_eq!(serde_json::from_str::<PatientId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<PatientId>("\"12\"").is_err());
    }

    #[test]
    fn schedule_id_parses_uuid() {
        let id = ScheduleId::new();
        let parsed: ScheduleId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ScheduleId>().is_err());
    }

    #[test]
    fn kind_digits() {
        assert_eq!(DoctorId::KIND.digits(), 8);
        assert_eq!(PatientId::KIND.digits(), 10);
        assert_eq!(ReservationId::KIND.digits(), 12);
    }
}
