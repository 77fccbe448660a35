// libs/appointment-cell/src/services/scheduler.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_utils::jwt::TokenValidator;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, SlotAvailability, StoreError, TimeInterval,
};
use crate::services::availability::{AvailabilityIndex, ScheduleGuard};
use crate::services::directory::{DoctorDirectory, PatientDirectory};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::policy::{self, Owners};
use crate::services::store::AppointmentStore;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Caller credentials plus an optional deadline for one scheduler call.
#[derive(Clone)]
pub struct CallContext {
    pub token: String,
    pub deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Books, moves, cancels and completes appointments.
///
/// Every mutation of a doctor's appointments happens while holding that
/// doctor's schedule lock, so the index and the store move together. The
/// deadline only bounds the work before the lock is taken; once a mutation has
/// started the call runs to completion, unwinding reservations if the store
/// rejects the write.
pub struct AppointmentScheduler {
    store: Arc<dyn AppointmentStore>,
    doctors: Arc<dyn DoctorDirectory>,
    patients: Arc<dyn PatientDirectory>,
    index: AvailabilityIndex,
    validator: TokenValidator,
    lifecycle: AppointmentLifecycleService,
    default_timeout: Duration,
}

impl AppointmentScheduler {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        doctors: Arc<dyn DoctorDirectory>,
        patients: Arc<dyn PatientDirectory>,
        validator: TokenValidator,
    ) -> Self {
        Self {
            store,
            doctors,
            patients,
            index: AvailabilityIndex::new(),
            validator,
            lifecycle: AppointmentLifecycleService::new(),
            default_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn AppointmentStore>,
        doctors: Arc<dyn DoctorDirectory>,
        patients: Arc<dyn PatientDirectory>,
    ) -> Self {
        Self::new(store, doctors, patients, TokenValidator::new(config.jwt_secret.clone()))
            .with_timeout(config.operation_timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Whether a one-hour slot of `doctor_id` starting at `start` is free,
    /// counting bookings already persisted before this scheduler first saw
    /// the doctor.
    pub async fn is_slot_free(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
    ) -> Result<bool, AppointmentError> {
        let schedule = self.lock_schedule(doctor_id).await?;
        Ok(schedule.is_free(&TimeInterval::starting_at(start)))
    }

    /// Exclusive hold of a doctor's loaded schedule. Every operation touching
    /// that doctor waits until the guard is dropped.
    pub async fn hold_schedule(&self, doctor_id: Uuid) -> Result<ScheduleGuard, AppointmentError> {
        self.lock_schedule(doctor_id).await
    }

    // ==========================================================================
    // MUTATIONS
    // ==========================================================================

    #[instrument(skip(self, ctx))]
    pub async fn book(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        appointment_time: DateTime<Utc>,
        ctx: &CallContext,
    ) -> Result<Uuid, AppointmentError> {
        let (mut schedule, patient_name) = self
            .before_deadline(ctx, async {
                let caller = policy::BOOK.authenticate(&self.validator, &ctx.token)?;
                policy::BOOK.authorize(&caller, Owners::new(patient_id, doctor_id))?;

                self.lifecycle.validate_appointment_timing(appointment_time, Utc::now())?;

                let doctor = self
                    .doctors
                    .lookup(doctor_id)
                    .await
                    .map_err(|e| e.into_appointment_error("Doctor"))?;
                if !doctor.is_active {
                    return Err(AppointmentError::DoctorInactive);
                }

                let patient = self
                    .patients
                    .lookup(patient_id)
                    .await
                    .map_err(|e| e.into_appointment_error("Patient"))?;
                if !patient.is_active {
                    return Err(AppointmentError::PatientInactive);
                }

                let schedule = self.lock_schedule(doctor_id).await?;
                Ok((schedule, patient.name))
            })
            .await?;

        let appointment = Appointment::new(doctor_id, patient_id, patient_name, appointment_time, Utc::now());
        let interval = appointment.interval();

        schedule.reserve(interval)?;

        match self.store.create(&appointment).await {
            Ok(id) => {
                info!("Booked appointment {} at {}", id, appointment_time);
                Ok(id)
            }
            Err(e) => {
                schedule.release(interval);
                warn!("Booking rolled back after store failure: {}", e);
                Err(persistence_failure(e))
            }
        }
    }

    #[instrument(skip(self, ctx))]
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        new_time: DateTime<Utc>,
        ctx: &CallContext,
    ) -> Result<Appointment, AppointmentError> {
        let (mut schedule, current) = self
            .before_deadline(ctx, async {
                let caller = policy::RESCHEDULE.authenticate(&self.validator, &ctx.token)?;
                let (schedule, current) = self.lock_owned_appointment(appointment_id, |a| {
                    policy::RESCHEDULE.authorize(&caller, Owners::new(a.patient_id, a.doctor_id))
                })
                .await?;

                self.lifecycle.ensure_mutable(&current)?;
                self.lifecycle.validate_appointment_timing(new_time, Utc::now())?;
                Ok((schedule, current))
            })
            .await?;

        let old_interval = current.interval();
        let new_interval = TimeInterval::starting_at(new_time);

        schedule.release(old_interval);
        if let Err(e) = schedule.reserve(new_interval) {
            restore(&mut schedule, old_interval);
            debug!("Reschedule of {} to {} refused: {}", appointment_id, new_time, e);
            return Err(e);
        }

        let mut updated = current;
        updated.appointment_time = new_time;
        updated.audit.touch(Utc::now());

        if let Err(e) = self.store.update(&updated).await {
            schedule.release(new_interval);
            restore(&mut schedule, old_interval);
            warn!("Reschedule of {} rolled back after store failure: {}", appointment_id, e);
            return Err(persistence_failure(e));
        }

        info!("Rescheduled appointment {} to {}", appointment_id, new_time);
        Ok(updated)
    }

    #[instrument(skip(self, ctx))]
    pub async fn cancel(&self, appointment_id: Uuid, ctx: &CallContext) -> Result<(), AppointmentError> {
        let (mut schedule, current) = self
            .before_deadline(ctx, async {
                let caller = policy::CANCEL.authenticate(&self.validator, &ctx.token)?;
                let (schedule, current) = self.lock_owned_appointment(appointment_id, |a| {
                    policy::CANCEL.authorize(&caller, Owners::new(a.patient_id, a.doctor_id))
                })
                .await?;

                self.lifecycle.ensure_mutable(&current)?;
                Ok((schedule, current))
            })
            .await?;

        let interval = current.interval();
        schedule.release(interval);

        match self.store.delete(appointment_id).await {
            Ok(()) => {
                info!("Cancelled appointment {}", appointment_id);
                Ok(())
            }
            Err(StoreError::NotFound) => Err(AppointmentError::NotFound("Appointment".to_string())),
            Err(e) => {
                restore(&mut schedule, interval);
                warn!("Cancellation of {} rolled back after store failure: {}", appointment_id, e);
                Err(persistence_failure(e))
            }
        }
    }

    #[instrument(skip(self, ctx))]
    pub async fn change_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        ctx: &CallContext,
    ) -> Result<Appointment, AppointmentError> {
        let (_schedule, current) = self
            .before_deadline(ctx, async {
                let caller = policy::CHANGE_STATUS.authenticate(&self.validator, &ctx.token)?;
                let (schedule, current) = self.lock_owned_appointment(appointment_id, |a| {
                    policy::CHANGE_STATUS.authorize(&caller, Owners::new(a.patient_id, a.doctor_id))
                })
                .await?;

                self.lifecycle.validate_status_transition(current.status, new_status)?;
                Ok((schedule, current))
            })
            .await?;

        let mut updated = current;
        updated.status = new_status;
        updated.audit.touch(Utc::now());

        self.store.update(&updated).await.map_err(persistence_failure)?;

        info!("Appointment {} is now {}", appointment_id, new_status);
        Ok(updated)
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    /// A doctor's appointments on one UTC day, optionally narrowed to patients
    /// whose name contains `patient_name`.
    #[instrument(skip(self, ctx))]
    pub async fn get_appointments(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        patient_name: Option<&str>,
        ctx: &CallContext,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.before_deadline(ctx, async {
            let caller = policy::LIST_DOCTOR_APPOINTMENTS.authenticate(&self.validator, &ctx.token)?;
            policy::LIST_DOCTOR_APPOINTMENTS.authorize(&caller, Owners::doctor(doctor_id))?;

            let filter = patient_name.map(str::trim).filter(|name| !name.is_empty());
            let appointments = match filter {
                Some(name) => self
                    .store
                    .query_by_patient_name_and_doctor(doctor_id, name)
                    .await
                    .map_err(persistence_failure)?
                    .into_iter()
                    .filter(|a| a.appointment_date() == date)
                    .collect(),
                None => self
                    .store
                    .query_by_doctor_and_date(doctor_id, date)
                    .await
                    .map_err(persistence_failure)?,
            };

            debug!("Found {} appointments", appointments.len());
            Ok(appointments)
        })
        .await
    }

    #[instrument(skip(self, ctx))]
    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        ctx: &CallContext,
    ) -> Result<Appointment, AppointmentError> {
        self.before_deadline(ctx, async {
            let caller = policy::VIEW_APPOINTMENT.authenticate(&self.validator, &ctx.token)?;
            let appointment = self.fetch(appointment_id).await?;
            policy::VIEW_APPOINTMENT.authorize(
                &caller,
                Owners::new(appointment.patient_id, appointment.doctor_id),
            )?;
            Ok(appointment)
        })
        .await
    }

    /// The doctor's declared slots on `date`, each flagged against live
    /// reservations.
    #[instrument(skip(self, ctx))]
    pub async fn doctor_availability(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        ctx: &CallContext,
    ) -> Result<Vec<SlotAvailability>, AppointmentError> {
        self.before_deadline(ctx, async {
            policy::VIEW_AVAILABILITY.authenticate(&self.validator, &ctx.token)?;

            let doctor = self
                .doctors
                .lookup(doctor_id)
                .await
                .map_err(|e| e.into_appointment_error("Doctor"))?;

            let schedule = self.lock_schedule(doctor_id).await?;
            let mut slots: Vec<SlotAvailability> = doctor
                .available_times
                .iter()
                .map(|slot| {
                    let interval = slot.on(date);
                    SlotAvailability {
                        start_time: interval.start,
                        end_time: interval.end,
                        is_free: schedule.is_free(&interval),
                    }
                })
                .collect();
            slots.sort_by_key(|slot| slot.start_time);
            Ok(slots)
        })
        .await
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn before_deadline<T, F>(&self, ctx: &CallContext, work: F) -> Result<T, AppointmentError>
    where
        F: Future<Output = Result<T, AppointmentError>>,
    {
        let deadline = ctx
            .deadline
            .unwrap_or_else(|| Instant::now() + self.default_timeout);

        if Instant::now() >= deadline {
            warn!("Deadline already elapsed, nothing attempted");
            return Err(AppointmentError::DeadlineExceeded);
        }

        tokio::time::timeout_at(deadline, work).await.unwrap_or_else(|_| {
            warn!("Deadline elapsed before the first mutation");
            Err(AppointmentError::DeadlineExceeded)
        })
    }

    async fn fetch(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .get(appointment_id)
            .await
            .map_err(|e| e.into_appointment_error("Appointment"))
    }

    /// Lock a doctor's schedule, seeding it from the store on first use.
    async fn lock_schedule(&self, doctor_id: Uuid) -> Result<ScheduleGuard, AppointmentError> {
        let mut schedule = self.index.lock(doctor_id).await;
        if !schedule.is_hydrated() {
            let existing = self
                .store
                .query_by_doctor(doctor_id)
                .await
                .map_err(persistence_failure)?;
            debug!("Hydrating schedule of doctor {} with {} bookings", doctor_id, existing.len());
            schedule.hydrate(existing.iter().map(Appointment::interval));
        }
        Ok(schedule)
    }

    /// Load an appointment, check the caller against it, then lock its doctor's
    /// schedule and re-read it so the returned copy is current under the lock.
    async fn lock_owned_appointment<A>(
        &self,
        appointment_id: Uuid,
        authorize: A,
    ) -> Result<(ScheduleGuard, Appointment), AppointmentError>
    where
        A: FnOnce(&Appointment) -> Result<(), shared_models::auth::AuthError>,
    {
        let found = self.fetch(appointment_id).await?;
        authorize(&found)?;

        let schedule = self.lock_schedule(found.doctor_id).await?;
        let current = self.fetch(appointment_id).await?;
        Ok((schedule, current))
    }
}

fn persistence_failure(error: StoreError) -> AppointmentError {
    AppointmentError::PersistenceFailure(error.to_string())
}

fn restore(schedule: &mut ScheduleGuard, interval: TimeInterval) {
    if schedule.reserve(interval).is_err() {
        warn!(
            "Could not restore reservation {} - {}",
            interval.start, interval.end
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_models::auth::Role;

    use crate::services::directory::InMemoryDirectory;
    use crate::services::store::InMemoryAppointmentStore;

    #[tokio::test]
    async fn test_elapsed_deadline_short_circuits() {
        let directory = Arc::new(InMemoryDirectory::new());
        let scheduler = AppointmentScheduler::new(
            InMemoryAppointmentStore::shared(),
            directory.clone(),
            directory,
            TokenValidator::new("scheduler-secret"),
        );
        let ctx = CallContext::new("not-even-a-token").with_deadline(Instant::now());

        assert_matches!(
            scheduler.get_appointment(Uuid::new_v4(), &ctx).await,
            Err(AppointmentError::DeadlineExceeded)
        );
    }

    #[tokio::test]
    async fn test_unknown_appointment_reported_before_ownership() {
        let directory = Arc::new(InMemoryDirectory::new());
        let scheduler = AppointmentScheduler::new(
            InMemoryAppointmentStore::shared(),
            directory.clone(),
            directory,
            TokenValidator::new("scheduler-secret"),
        );
        let token = scheduler
            .validator()
            .issue(Uuid::new_v4(), Role::Patient, chrono::Duration::hours(1))
            .unwrap();

        assert_matches!(
            scheduler.cancel(Uuid::new_v4(), &CallContext::new(token)).await,
            Err(AppointmentError::NotFound(_))
        );
    }

    #[test]
    fn test_call_context_debug_hides_token() {
        let ctx = CallContext::new("secret-token");
        assert!(!format!("{:?}", ctx).contains("secret-token"));
    }
}
