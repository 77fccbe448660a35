// libs/appointment-cell/src/services/availability.rs
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{AppointmentError, TimeInterval};

/// Reserved intervals of a single doctor, keyed by start time.
///
/// Reserved intervals never overlap, so the only candidate for a conflict with
/// `[start, end)` is the last interval starting before `end`.
#[derive(Debug, Default)]
pub struct DoctorSchedule {
    reserved: BTreeMap<DateTime<Utc>, DateTime<Utc>>,
    hydrated: bool,
}

impl DoctorSchedule {
    pub fn is_free(&self, interval: &TimeInterval) -> bool {
        match self.reserved.range(..interval.end).next_back() {
            Some((_, end)) => *end <= interval.start,
            None => true,
        }
    }

    pub fn reserve(&mut self, interval: TimeInterval) -> Result<(), AppointmentError> {
        if interval.is_empty() {
            return Err(AppointmentError::InvalidTime(
                "Interval must end after it starts".to_string(),
            ));
        }
        if !self.is_free(&interval) {
            return Err(AppointmentError::Conflict);
        }
        self.reserved.insert(interval.start, interval.end);
        Ok(())
    }

    /// Remove exactly `interval`; returns false when it was not reserved.
    pub fn release(&mut self, interval: TimeInterval) -> bool {
        if self.reserved.get(&interval.start) == Some(&interval.end) {
            self.reserved.remove(&interval.start);
            true
        } else {
            false
        }
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// Seed from persisted bookings. Only the first call has an effect.
    pub fn hydrate(&mut self, intervals: impl IntoIterator<Item = TimeInterval>) {
        if self.hydrated {
            return;
        }
        for interval in intervals {
            if self.reserve(interval).is_err() {
                warn!(
                    "Persisted booking {} - {} overlaps another booking, skipping",
                    interval.start, interval.end
                );
            }
        }
        self.hydrated = true;
    }

    pub fn reserved(&self) -> Vec<TimeInterval> {
        self.reserved
            .iter()
            .map(|(start, end)| TimeInterval::new(*start, *end))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.reserved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reserved.is_empty()
    }
}

pub type ScheduleGuard = OwnedMutexGuard<DoctorSchedule>;

/// Per-doctor reserved intervals behind one async mutex per doctor.
///
/// Waiters on the same doctor are served in arrival order; different doctors
/// never contend beyond the short map lookup.
///
/// The index only knows intervals reserved through it. Persisted bookings
/// appear once `AppointmentScheduler` hydrates a doctor, so outside callers
/// ask the scheduler rather than the index.
#[derive(Debug, Default)]
pub struct AvailabilityIndex {
    schedules: Mutex<HashMap<Uuid, Arc<Mutex<DoctorSchedule>>>>,
}

impl AvailabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive hold of one doctor's schedule.
    pub async fn lock(&self, doctor_id: Uuid) -> ScheduleGuard {
        let schedule = {
            let mut schedules = self.schedules.lock().await;
            Arc::clone(schedules.entry(doctor_id).or_default())
        };
        schedule.lock_owned().await
    }

    pub async fn is_free(&self, doctor_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.lock(doctor_id).await.is_free(&TimeInterval::new(start, end))
    }

    pub async fn reserve(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        let result = self.lock(doctor_id).await.reserve(TimeInterval::new(start, end));
        debug!("Reserve {} - {} for doctor {}: {:?}", start, end, doctor_id, result);
        result
    }

    pub async fn release(&self, doctor_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) {
        if !self.lock(doctor_id).await.release(TimeInterval::new(start, end)) {
            debug!("Release of {} - {} for doctor {} was a no-op", start, end, doctor_id);
        }
    }

    pub async fn reserved(&self, doctor_id: Uuid) -> Vec<TimeInterval> {
        self.lock(doctor_id).await.reserved()
    }
}
