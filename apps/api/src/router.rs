use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::{info, warn};

use appointment_cell::handlers::AppState;
use appointment_cell::router::appointment_routes;
use anyhow::Context;

use appointment_cell::services::directory::{DirectorySeed, InMemoryDirectory, SupabaseDirectory};
use appointment_cell::services::scheduler::AppointmentScheduler;
use appointment_cell::services::store::{InMemoryAppointmentStore, SupabaseAppointmentStore};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

async fn load_seed(path: &str) -> anyhow::Result<DirectorySeed> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading directory seed {}", path))?;
    let seed: DirectorySeed =
        serde_json::from_str(&raw).with_context(|| format!("parsing directory seed {}", path))?;
    info!(
        "Loaded {} doctors and {} patients from {}",
        seed.doctors.len(),
        seed.patients.len(),
        path
    );
    Ok(seed)
}

/// Wire the scheduler to Supabase when configured, otherwise to in-memory
/// collaborators that live as long as the process.
pub async fn build_scheduler(config: &AppConfig) -> anyhow::Result<AppointmentScheduler> {
    if config.is_database_configured() {
        info!("Using Supabase-backed appointment storage");
        let supabase = Arc::new(SupabaseClient::new(config));
        let directory = Arc::new(SupabaseDirectory::new(Arc::clone(&supabase)));
        return Ok(AppointmentScheduler::from_config(
            config,
            Arc::new(SupabaseAppointmentStore::new(supabase)),
            directory.clone(),
            directory,
        ));
    }

    warn!("Database not configured, appointments are kept in memory");
    let seed = match &config.directory_seed_path {
        Some(path) => load_seed(path).await?,
        None => {
            warn!("SCHEDULER_DIRECTORY_SEED not set, directory starts empty");
            DirectorySeed::default()
        }
    };
    let directory = Arc::new(InMemoryDirectory::from_seed(seed));

    Ok(AppointmentScheduler::from_config(
        config,
        InMemoryAppointmentStore::shared(),
        directory.clone(),
        directory,
    ))
}

pub async fn create_router(config: &AppConfig) -> anyhow::Result<Router> {
    let state = Arc::new(AppState::new(Arc::new(build_scheduler(config).await?)));

    Ok(Router::new()
        .route("/", get(|| async { "Clinic scheduler API is running!" }))
        .nest("/appointments", appointment_routes(state)))
}
