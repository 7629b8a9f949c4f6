//! Schedules: a doctor's bookable blocks of time with finite capacity.

use crate::error::ClinicError;
use crate::ids::{DoctorId, ScheduleId};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capacity used when a schedule is published without one
pub const DEFAULT_CAPACITY: u32 = 10;

/// Coarse time-of-day bucket a schedule belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotCategory {
    /// Morning clinic
    Morning,
    /// Afternoon clinic
    Afternoon,
    /// Evening clinic
    Evening,
}

impl SlotCategory {
    /// All categories in day order
    pub const ALL: [Self; 3] = [Self::Morning, Self::Afternoon, Self::Evening];

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }
}

impl fmt::Display for SlotCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the lowercase names in any case, ignoring surrounding whitespace
impl FromStr for SlotCategory {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" => Ok(Self::Morning),
            "afternoon" => Ok(Self::Afternoon),
            "evening" => Ok(Self::Evening),
            _ => Err(ClinicError::InvalidCategory(s.to_string())),
        }
    }
}

/// Schedule status, derived from capacity except for operator withdrawal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    /// Accepting bookings
    Normal,
    /// `booked == capacity`
    Full,
    /// Cancelled by an operator; never accepts bookings again
    Withdrawn,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Full => "full",
            Self::Withdrawn => "withdrawn",
        })
    }
}

/// Parameters for publishing a schedule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    /// Doctor publishing availability
    pub doctor_id: DoctorId,
    /// Calendar date
    pub date: NaiveDate,
    /// Window start
    pub start: NaiveTime,
    /// Window end (must be after start)
    pub end: NaiveTime,
    /// Time-of-day bucket
    pub category: SlotCategory,
    /// Bookable units
    pub capacity: u32,
}

impl ScheduleRequest {
    /// Creates a request with the default capacity
    #[must_use]
    pub const fn new(
        doctor_id: DoctorId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        category: SlotCategory,
    ) -> Self {
        Self {
            doctor_id,
            date,
            start,
            end,
            category,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Overrides the capacity
    #[must_use]
    pub const fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Checks the window, capacity and date against `today`.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::InvalidWindow`] if `end <= start`
    /// - [`ClinicError::InvalidCapacity`] if `capacity == 0`
    /// - [`ClinicError::PastDate`] if `date < today`
    pub fn validate(&self, today: NaiveDate) -> Result<(), ClinicError> {
        if self.end <= self.start {
            return Err(ClinicError::InvalidWindow {
                start: self.start,
                end: self.end,
            });
        }
        if self.capacity == 0 {
            return Err(ClinicError::InvalidCapacity {
                capacity: 0,
                booked: 0,
            });
        }
        if self.date < today {
            return Err(ClinicError::PastDate {
                date: self.date,
                today,
            });
        }
        Ok(())
    }
}

/// One bookable block of a doctor's time.
///
/// Capacity accounting fields are private: they only change through
/// [`Schedule::reserve_unit`], [`Schedule::release_unit`],
/// [`Schedule::resize`] and [`Schedule::withdraw`], each of which recomputes
/// the status. The schedule ledger calls these only while holding the
/// schedule's lock. Deserialized records are checked the same way.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredSchedule")]
pub struct Schedule {
    /// Schedule identifier
    pub id: ScheduleId,
    /// Owning doctor
    pub doctor_id: DoctorId,
    /// Calendar date
    pub date: NaiveDate,
    /// Window start
    pub start: NaiveTime,
    /// Window end
    pub end: NaiveTime,
    /// Time-of-day bucket
    pub category: SlotCategory,
    capacity: u32,
    booked: u32,
    status: ScheduleStatus,
}

impl Schedule {
    /// Opens a new schedule with nothing booked.
    ///
    /// # Errors
    ///
    /// Propagates [`ScheduleRequest::validate`] failures.
    pub fn open(id: ScheduleId, request: ScheduleRequest, today: NaiveDate) -> Result<Self, ClinicError> {
        request.validate(today)?;
        Ok(Self {
            id,
            doctor_id: request.doctor_id,
            date: request.date,
            start: request.start,
            end: request.end,
            category: request.category,
            capacity: request.capacity,
            booked: 0,
            status: ScheduleStatus::Normal,
        })
    }

    /// Bookable units
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Units currently booked
    #[must_use]
    pub const fn booked(&self) -> u32 {
        self.booked
    }

    /// Units still free
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.booked)
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> ScheduleStatus {
        self.status
    }

    /// Whether a booking could currently succeed
    #[must_use]
    pub fn is_bookable(&self) -> bool {
        self.status == ScheduleStatus::Normal
    }

    /// Start of the window as an instant (dates and times are UTC)
    #[must_use]
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start).and_utc()
    }

    /// Takes one unit if any is free and the schedule is not withdrawn.
    pub fn reserve_unit(&mut self) -> bool {
        if self.status == ScheduleStatus::Withdrawn || self.booked >= self.capacity {
            return false;
        }
        self.booked += 1;
        self.recompute_status();
        true
    }

    /// Returns one unit. Returns `false` if nothing was booked.
    pub fn release_unit(&mut self) -> bool {
        if self.booked == 0 {
            return false;
        }
        self.booked -= 1;
        self.recompute_status();
        true
    }

    /// Changes the capacity.
    ///
    /// # Errors
    ///
    /// [`ClinicError::InvalidCapacity`] if `capacity` is zero or below the
    /// number of units already booked.
    pub fn resize(&mut self, capacity: u32) -> Result<(), ClinicError> {
        if capacity == 0 || capacity < self.booked {
            return Err(ClinicError::InvalidCapacity {
                capacity,
                booked: self.booked,
            });
        }
        self.capacity = capacity;
        self.recompute_status();
        Ok(())
    }

    /// Marks the schedule as withdrawn by an operator.
    pub fn withdraw(&mut self) {
        self.status = ScheduleStatus::Withdrawn;
    }

    fn recompute_status(&mut self) {
        if self.status == ScheduleStatus::Withdrawn {
            return;
        }
        self.status = if self.booked >= self.capacity {
            ScheduleStatus::Full
        } else {
            ScheduleStatus::Normal
        };
    }
}

/// Serialized form of a [`Schedule`] before its counts are checked
#[derive(Deserialize)]
struct StoredSchedule {
    id: ScheduleId,
    doctor_id: DoctorId,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    category: SlotCategory,
    capacity: u32,
    booked: u32,
    status: ScheduleStatus,
}

impl TryFrom<StoredSchedule> for Schedule {
    type Error = ClinicError;

    fn try_from(stored: StoredSchedule) -> Result<Self, Self::Error> {
        if stored.capacity == 0 || stored.booked > stored.capacity {
            return Err(ClinicError::InvalidCapacity {
                capacity: stored.capacity,
                booked: stored.booked,
            });
        }
        if stored.end <= stored.start {
            return Err(ClinicError::Validation(format!(
                "schedule {} ends at {} before it starts at {}",
                stored.id, stored.end, stored.start
            )));
        }

        // Full and Normal follow from the counts; only withdrawal is kept as stored
        let mut schedule = Self {
            id: stored.id,
            doctor_id: stored.doctor_id,
            date: stored.date,
            start: stored.start,
            end: stored.end,
            category: stored.category,
            capacity: stored.capacity,
            booked: stored.booked,
            status: stored.status,
        };
        schedule.recompute_status();
        Ok(schedule)
    }
}
