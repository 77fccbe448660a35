// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::AuthenticatedUser;
use shared_models::error::AppError;
use shared_utils::jwt::TokenValidator;

use crate::models::{
    AppointmentError, AvailabilityQuery, BookAppointmentRequest, ChangeStatusRequest,
    DoctorAppointmentsQuery, RescheduleAppointmentRequest,
};
use crate::services::scheduler::{AppointmentScheduler, CallContext};

/// Shared state behind the appointment routes.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<AppointmentScheduler>,
    pub validator: Arc<TokenValidator>,
}

impl AppState {
    pub fn new(scheduler: Arc<AppointmentScheduler>) -> Self {
        let validator = Arc::new(scheduler.validator().clone());
        Self { scheduler, validator }
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::Unauthorized(_) => AppError::Auth(e.to_string()),
            AppointmentError::NotFound(_) => AppError::NotFound(e.to_string()),
            AppointmentError::Conflict => AppError::Conflict(e.to_string()),
            AppointmentError::InvalidTime(_)
            | AppointmentError::InvalidState(_)
            | AppointmentError::InvalidTransition { .. }
            | AppointmentError::DoctorInactive
            | AppointmentError::PatientInactive => AppError::ValidationError(e.to_string()),
            AppointmentError::DeadlineExceeded => AppError::Unavailable(e.to_string()),
            AppointmentError::PersistenceFailure(_) => AppError::Database(e.to_string()),
        }
    }
}

fn context(auth: &Authorization<Bearer>) -> CallContext {
    CallContext::new(auth.token())
}

// ==============================================================================
// APPOINTMENT MUTATIONS
// ==============================================================================

pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    debug!("{} {} booking doctor {}", user.role, user.subject_id, request.doctor_id);

    let appointment_id = state
        .scheduler
        .book(request.doctor_id, request.patient_id, request.appointment_time, &context(&auth))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "id": appointment_id,
            "message": "Appointment booked"
        })),
    ))
}

pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .scheduler
        .get_appointment(appointment_id, &context(&auth))
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

pub async fn reschedule_appointment(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .scheduler
        .reschedule(appointment_id, request.appointment_time, &context(&auth))
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled"
    })))
}

pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    debug!("{} {} cancelling {}", user.role, user.subject_id, appointment_id);

    state
        .scheduler
        .cancel(appointment_id, &context(&auth))
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment cancelled"
    })))
}

pub async fn change_appointment_status(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ChangeStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .scheduler
        .change_status(appointment_id, request.status, &context(&auth))
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

// ==============================================================================
// DOCTOR VIEWS
// ==============================================================================

pub async fn get_doctor_appointments(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DoctorAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = state
        .scheduler
        .get_appointments(doctor_id, query.date, query.patient_name.as_deref(), &context(&auth))
        .await?;

    Ok(Json(json!({
        "success": true,
        "date": query.date,
        "total": appointments.len(),
        "appointments": appointments
    })))
}

pub async fn get_doctor_availability(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state
        .scheduler
        .doctor_availability(doctor_id, query.date, &context(&auth))
        .await?;

    Ok(Json(json!({
        "success": true,
        "doctor_id": doctor_id,
        "date": query.date,
        "slots": slots
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_models::auth::AuthError;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (AppointmentError::Unauthorized(AuthError::Expired), StatusCode::UNAUTHORIZED),
            (AppointmentError::NotFound("Appointment".into()), StatusCode::NOT_FOUND),
            (AppointmentError::Conflict, StatusCode::CONFLICT),
            (AppointmentError::DoctorInactive, StatusCode::BAD_REQUEST),
            (AppointmentError::PatientInactive, StatusCode::BAD_REQUEST),
            (AppointmentError::DeadlineExceeded, StatusCode::SERVICE_UNAVAILABLE),
            (AppointmentError::PersistenceFailure("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(AppError::from(error).status_code(), status);
        }
    }
}
