// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, StoreError};

/// Durable CRUD over appointment records. Every list is ordered by
/// `appointment_time` ascending.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn create(&self, appointment: &Appointment) -> Result<Uuid, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Appointment, StoreError>;

    async fn update(&self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Appointments of `doctor_id` starting within the UTC day `date`.
    async fn query_by_doctor_and_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Appointments of `doctor_id` whose patient name contains `name_pattern`,
    /// ignoring case.
    async fn query_by_patient_name_and_doctor(
        &self,
        doctor_id: Uuid,
        name_pattern: &str,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn query_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>, StoreError>;
}

fn sorted(mut appointments: Vec<Appointment>) -> Vec<Appointment> {
    appointments.sort_by_key(|a| a.appointment_time);
    appointments
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Debug, Default)]
pub struct InMemoryAppointmentStore {
    records: RwLock<HashMap<Uuid, Appointment>>,
    fail_writes: AtomicBool,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent create/update/delete fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write rejected by store".to_string()));
        }
        Ok(())
    }

    async fn filter<F>(&self, predicate: F) -> Vec<Appointment>
    where
        F: Fn(&Appointment) -> bool,
    {
        let records = self.records.read().await;
        sorted(records.values().filter(|a| predicate(a)).cloned().collect())
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn create(&self, appointment: &Appointment) -> Result<Uuid, StoreError> {
        self.check_writable()?;
        let id = appointment.id();
        self.records.write().await.insert(id, appointment.clone());
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Appointment, StoreError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, appointment: &Appointment) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        match records.get_mut(&appointment.id()) {
            Some(existing) => {
                *existing = appointment.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.check_writable()?;
        self.records
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn query_by_doctor_and_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .filter(|a| a.doctor_id == doctor_id && a.appointment_date() == date)
            .await)
    }

    async fn query_by_patient_name_and_doctor(
        &self,
        doctor_id: Uuid,
        name_pattern: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let needle = name_pattern.to_lowercase();
        Ok(self
            .filter(|a| a.doctor_id == doctor_id && contains_ignoring_case(&a.patient_name, &needle))
            .await)
    }

    async fn query_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>, StoreError> {
        Ok(self.filter(|a| a.doctor_id == doctor_id).await)
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

/// Appointment rows in the `appointments` table, read and written through
/// PostgREST.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn rows(&self, method: Method, path: &str, body: Option<Value>) -> Result<Vec<Value>, StoreError> {
        self.supabase
            .request::<Vec<Value>>(method, path, None, body)
            .await
            .map_err(|e| {
                error!("Appointment store request failed: {}", e);
                StoreError::Backend(e.to_string())
            })
    }

    async fn appointments(&self, path: &str) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.rows(Method::GET, path, None).await?;
        let appointments = rows
            .into_iter()
            .map(parse_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sorted(appointments))
    }
}

fn parse_row(row: Value) -> Result<Appointment, StoreError> {
    serde_json::from_value(row).map_err(|e| {
        error!("Failed to parse appointment row: {}", e);
        StoreError::Backend(format!("malformed appointment row: {}", e))
    })
}

/// Escape LIKE wildcards in a name filter. PostgREST rewrites every `*` to
/// `%` and offers no escape for it, so `*` is sent as a single-character `_`
/// and the rows are narrowed again by `contains_ignoring_case`.
fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '\\' | '%' | '_' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '*' => escaped.push('_'),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn contains_ignoring_case(name: &str, needle: &str) -> bool {
    name.to_lowercase().contains(needle)
}

fn to_row(appointment: &Appointment) -> Result<Value, StoreError> {
    serde_json::to_value(appointment).map_err(|e| StoreError::Backend(e.to_string()))
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn create(&self, appointment: &Appointment) -> Result<Uuid, StoreError> {
        let rows = self
            .rows(Method::POST, "/rest/v1/appointments", Some(to_row(appointment)?))
            .await?;

        let created = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("insert returned no rows".to_string()))
            .and_then(parse_row)?;

        debug!("Stored appointment {}", created.id());
        Ok(created.id())
    }

    async fn get(&self, id: Uuid) -> Result<Appointment, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        self.appointments(&path)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment.id());
        let body = json!({
            "appointment_time": appointment.appointment_time,
            "status": appointment.status,
            "updated_at": appointment.audit.updated_at,
        });

        if self.rows(Method::PATCH, &path, Some(body)).await?.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        if self.rows(Method::DELETE, &path, None).await?.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn query_by_doctor_and_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let start = date.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).ok_or_else(|| {
            StoreError::Backend(format!("cannot represent start of {}", date))
        })?;
        // The last representable day has no next midnight to bound it.
        let upper = start
            .checked_add_signed(Duration::days(1))
            .map(|end| format!("&appointment_time=lt.{}", urlencoding::encode(&end.to_rfc3339())))
            .unwrap_or_default();

        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_time=gte.{}{}&order=appointment_time.asc",
            doctor_id,
            urlencoding::encode(&start.to_rfc3339()),
            upper,
        );
        self.appointments(&path).await
    }

    async fn query_by_patient_name_and_doctor(
        &self,
        doctor_id: Uuid,
        name_pattern: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&patient_name=ilike.*{}*&order=appointment_time.asc",
            doctor_id,
            urlencoding::encode(&escape_like(name_pattern)),
        );
        let needle = name_pattern.to_lowercase();
        Ok(self
            .appointments(&path)
            .await?
            .into_iter()
            .filter(|a| contains_ignoring_case(&a.patient_name, &needle))
            .collect())
    }

    async fn query_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&order=appointment_time.asc",
            doctor_id
        );
        self.appointments(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    fn appointment(doctor_id: Uuid, name: &str, day: u32, hour: u32) -> Appointment {
        let now = Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap();
        let time = Utc.with_ymd_and_hms(2031, 1, day, hour, 0, 0).unwrap();
        Appointment::new(doctor_id, Uuid::new_v4(), name, time, now)
    }

    #[tokio::test]
    async fn test_crud_round() {
        let store = InMemoryAppointmentStore::new();
        let mut record = appointment(Uuid::new_v4(), "Ada", 2, 9);

        let id = store.create(&record).await.unwrap();
        assert_eq!(id, record.id());
        assert_eq!(store.get(id).await.unwrap(), record);

        record.appointment_time = record.appointment_time + Duration::hours(2);
        store.update(&record).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().appointment_time, record.appointment_time);

        store.delete(id).await.unwrap();
        assert_matches!(store.get(id).await, Err(StoreError::NotFound));
        assert_matches!(store.delete(id).await, Err(StoreError::NotFound));
        assert_matches!(store.update(&record).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_queries_filter_and_order() {
        let store = InMemoryAppointmentStore::new();
        let doctor = Uuid::new_v4();

        for record in [
            appointment(doctor, "Grace Hopper", 3, 15),
            appointment(doctor, "Ada Lovelace", 3, 9),
            appointment(doctor, "Alan Turing", 4, 9),
            appointment(Uuid::new_v4(), "Ada Byron", 3, 9),
        ] {
            store.create(&record).await.unwrap();
        }

        let day = NaiveDate::from_ymd_opt(2031, 1, 3).unwrap();
        let on_day = store.query_by_doctor_and_date(doctor, day).await.unwrap();
        let names: Vec<_> = on_day.iter().map(|a| a.patient_name.as_str()).collect();
        assert_eq!(names, vec!["Ada Lovelace", "Grace Hopper"]);

        let by_name = store.query_by_patient_name_and_doctor(doctor, "a T").await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].patient_name, "Alan Turing");

        assert_eq!(store.query_by_doctor(doctor).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_name_filter_is_plain_substring() {
        let store = InMemoryAppointmentStore::new();
        let doctor = Uuid::new_v4();
        store.create(&appointment(doctor, "Jo_Beth", 2, 9)).await.unwrap();
        store.create(&appointment(doctor, "Joe Beth", 2, 11)).await.unwrap();

        let found = store.query_by_patient_name_and_doctor(doctor, "o_b").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].patient_name, "Jo_Beth");
        assert!(store.query_by_patient_name_and_doctor(doctor, "%").await.unwrap().is_empty());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("ada"), "ada");
        assert_eq!(escape_like("100%_x"), r"100\%\_x");
        assert_eq!(escape_like(r"a\b"), r"a\\b");
        assert_eq!(escape_like("a*b"), "a_b");
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = InMemoryAppointmentStore::new();
        store.fail_writes(true);

        let record = appointment(Uuid::new_v4(), "Ada", 2, 9);
        assert_matches!(store.create(&record).await, Err(StoreError::Backend(_)));
        assert!(store.is_empty().await);

        store.fail_writes(false);
        assert!(store.create(&record).await.is_ok());
        assert_eq!(store.len().await, 1);
    }
}
