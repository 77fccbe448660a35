// libs/appointment-cell/src/services/directory.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{DoctorProfile, PatientProfile, SlotDescriptor, StoreError};

#[async_trait]
pub trait DoctorDirectory: Send + Sync {
    async fn lookup(&self, doctor_id: Uuid) -> Result<DoctorProfile, StoreError>;
}

#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn lookup(&self, patient_id: Uuid) -> Result<PatientProfile, StoreError>;
}

/// Initial contents of an in-memory directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub doctors: Vec<DoctorProfile>,
    #[serde(default)]
    pub patients: Vec<PatientProfile>,
}

/// Doctor and patient profiles held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    doctors: RwLock<HashMap<Uuid, DoctorProfile>>,
    patients: RwLock<HashMap<Uuid, PatientProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        Self {
            doctors: RwLock::new(seed.doctors.into_iter().map(|d| (d.id, d)).collect()),
            patients: RwLock::new(seed.patients.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    pub async fn insert_doctor(&self, doctor: DoctorProfile) {
        self.doctors.write().await.insert(doctor.id, doctor);
    }

    pub async fn insert_patient(&self, patient: PatientProfile) {
        self.patients.write().await.insert(patient.id, patient);
    }

    /// Register an active doctor with the given working slots.
    pub async fn add_doctor(&self, doctor_id: Uuid, slots: &[&str]) -> Result<(), String> {
        let available_times = slots
            .iter()
            .map(|slot| slot.parse::<SlotDescriptor>())
            .collect::<Result<Vec<_>, _>>()?;
        self.insert_doctor(DoctorProfile {
            id: doctor_id,
            is_active: true,
            available_times,
        })
        .await;
        Ok(())
    }

    pub async fn add_patient(&self, patient_id: Uuid, name: impl Into<String>) {
        self.insert_patient(PatientProfile {
            id: patient_id,
            name: name.into(),
            is_active: true,
        })
        .await;
    }

    pub async fn set_doctor_active(&self, doctor_id: Uuid, is_active: bool) {
        if let Some(doctor) = self.doctors.write().await.get_mut(&doctor_id) {
            doctor.is_active = is_active;
        }
    }

    pub async fn set_patient_active(&self, patient_id: Uuid, is_active: bool) {
        if let Some(patient) = self.patients.write().await.get_mut(&patient_id) {
            patient.is_active = is_active;
        }
    }
}

#[async_trait]
impl DoctorDirectory for InMemoryDirectory {
    async fn lookup(&self, doctor_id: Uuid) -> Result<DoctorProfile, StoreError> {
        self.doctors
            .read()
            .await
            .get(&doctor_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl PatientDirectory for InMemoryDirectory {
    async fn lookup(&self, patient_id: Uuid) -> Result<PatientProfile, StoreError> {
        self.patients
            .read()
            .await
            .get(&patient_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

/// Profiles read from the `doctors` and `patients` tables.
pub struct SupabaseDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch_one<T: DeserializeOwned>(&self, table: &str, id: Uuid) -> Result<T, StoreError> {
        let path = format!("/rest/v1/{}?id=eq.{}", table, id);
        debug!("Looking up {} {}", table, id);

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| {
                error!("Directory lookup in {} failed: {}", table, e);
                StoreError::Backend(e.to_string())
            })?;

        let row = rows.into_iter().next().ok_or(StoreError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| StoreError::Backend(format!("malformed {} row: {}", table, e)))
    }
}

#[async_trait]
impl DoctorDirectory for SupabaseDirectory {
    async fn lookup(&self, doctor_id: Uuid) -> Result<DoctorProfile, StoreError> {
        self.fetch_one("doctors", doctor_id).await
    }
}

#[async_trait]
impl PatientDirectory for SupabaseDirectory {
    async fn lookup(&self, patient_id: Uuid) -> Result<PatientProfile, StoreError> {
        self.fetch_one("patients", patient_id).await
    }
}
