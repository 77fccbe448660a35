pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::AppState;
pub use router::appointment_routes;
pub use services::scheduler::{AppointmentScheduler, CallContext};
