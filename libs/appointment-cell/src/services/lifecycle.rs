// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{slot_end, Appointment, AppointmentError, AppointmentStatus};

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current_status {
            AppointmentStatus::Scheduled => &[AppointmentStatus::Completed],
            // Terminal
            AppointmentStatus::Completed => &[],
        }
    }

    /// Reschedule and cancel only apply while the appointment is still scheduled.
    pub fn ensure_mutable(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        if appointment.is_scheduled() {
            Ok(())
        } else {
            Err(AppointmentError::InvalidState(appointment.status))
        }
    }

    pub fn validate_appointment_timing(
        &self,
        appointment_time: DateTime<Utc>,
        current_time: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if appointment_time <= current_time {
            return Err(AppointmentError::InvalidTime(format!(
                "Appointment must be scheduled for a future time (requested {}, now {})",
                appointment_time.to_rfc3339(),
                current_time.to_rfc3339()
            )));
        }
        if slot_end(appointment_time).is_none() {
            return Err(AppointmentError::InvalidTime(format!(
                "Appointment at {} would end past the last representable time",
                appointment_time.to_rfc3339()
            )));
        }
        Ok(())
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
