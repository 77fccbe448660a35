// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use shared_models::auth::AuthError;

/// Every appointment occupies exactly this much of the doctor's time.
pub const APPOINTMENT_DURATION_MINUTES: i64 = 60;

pub fn appointment_duration() -> Duration {
    Duration::minutes(APPOINTMENT_DURATION_MINUTES)
}

/// End of a slot starting at `start`, or `None` when it falls past the last
/// representable instant.
pub fn slot_end(start: DateTime<Utc>) -> Option<DateTime<Utc>> {
    start.checked_add_signed(appointment_duration())
}

// ==============================================================================
// AUDIT STAMP
// ==============================================================================

/// Identity and timestamps shared by every persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuditStamp {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(flatten)]
    pub audit: AuditStamp,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub appointment_time: DateTime<Utc>,
    pub status: AppointmentStatus,
}

impl Appointment {
    pub fn new(
        doctor_id: Uuid,
        patient_id: Uuid,
        patient_name: impl Into<String>,
        appointment_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            audit: AuditStamp::new(now),
            doctor_id,
            patient_id,
            patient_name: patient_name.into(),
            appointment_time,
            status: AppointmentStatus::Scheduled,
        }
    }

    pub fn id(&self) -> Uuid {
        self.audit.id
    }

    /// Derived end of the slot; never stored.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.interval().end
    }

    pub fn appointment_date(&self) -> NaiveDate {
        self.appointment_time.date_naive()
    }

    pub fn appointment_time_of_day(&self) -> NaiveTime {
        self.appointment_time.time()
    }

    /// Half-open `[start, end)` interval this appointment reserves.
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::starting_at(self.appointment_time)
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A half-open `[start, end)` span of a doctor's time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Slot starting at `start`, clamped to the last representable instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self::new(start, slot_end(start).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ==============================================================================
// DIRECTORY MODELS
// ==============================================================================

/// A declared working slot such as `09:00-10:00`, independent of bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotDescriptor {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SlotDescriptor {
    pub fn on(&self, date: NaiveDate) -> TimeInterval {
        TimeInterval::new(date.and_time(self.start).and_utc(), date.and_time(self.end).and_utc())
    }
}

impl FromStr for SlotDescriptor {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (start, end) = value
            .split_once('-')
            .ok_or_else(|| format!("slot '{}' is not in HH:MM-HH:MM form", value))?;
        let parse = |part: &str| {
            NaiveTime::parse_from_str(part.trim(), "%H:%M")
                .map_err(|e| format!("slot '{}': {}", value, e))
        };
        let (start, end) = (parse(start)?, parse(end)?);
        if end <= start {
            return Err(format!("slot '{}' ends before it starts", value));
        }
        Ok(Self { start, end })
    }
}

impl TryFrom<String> for SlotDescriptor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SlotDescriptor> for String {
    fn from(slot: SlotDescriptor) -> Self {
        slot.to_string()
    }
}

impl fmt::Display for SlotDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorProfile {
    pub id: Uuid,
    pub is_active: bool,
    #[serde(default)]
    pub available_times: Vec<SlotDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
}

/// One declared slot on a concrete date, flagged against live reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_free: bool,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub appointment_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorAppointmentsQuery {
    pub date: NaiveDate,
    pub patient_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum AppointmentError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Appointment slot conflicts with an existing booking")]
    Conflict,

    #[error("Invalid appointment time: {0}")]
    InvalidTime(String),

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidState(AppointmentStatus),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Doctor is not accepting appointments")]
    DoctorInactive,

    #[error("Patient account is inactive")]
    PatientInactive,

    #[error("Deadline elapsed before the operation could start")]
    DeadlineExceeded,

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

/// Failures reported by store and directory collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Map into the scheduler taxonomy, naming what was missing.
    pub fn into_appointment_error(self, entity: &str) -> AppointmentError {
        match self {
            StoreError::NotFound => AppointmentError::NotFound(entity.to_string()),
            StoreError::Backend(msg) => AppointmentError::PersistenceFailure(msg),
        }
    }
}
