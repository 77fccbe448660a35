// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppState};

pub fn appointment_routes(state: Arc<AppState>) -> Router {
    // Every route requires a bearer token; the scheduler applies the
    // per-operation role and ownership rules.
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment).delete(handlers::cancel_appointment),
        )
        .route("/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/{appointment_id}/status", patch(handlers::change_appointment_status))
        .route("/doctors/{doctor_id}", get(handlers::get_doctor_appointments))
        .route("/doctors/{doctor_id}/availability", get(handlers::get_doctor_availability))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.validator),
            auth_middleware,
        ));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
