//! Appointment persistence.

use crate::model::{Appointment, AppointmentDraft, AppointmentId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("appointment store lock poisoned")]
    Poisoned,
}

pub trait AppointmentStore: Send + Sync {
    fn insert(&self, draft: AppointmentDraft) -> Result<Appointment, StoreError>;
    fn find_by_id(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError>;
    /// All appointments ordered by id.
    fn find_all(&self) -> Result<Vec<Appointment>, StoreError>;
    /// Replaces a stored appointment; `None` if the id is unknown.
    fn update(&self, appointment: Appointment) -> Result<Option<Appointment>, StoreError>;
    fn delete(&self, id: AppointmentId) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<AppointmentId, Appointment>>,
    next_id: AtomicU64,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppointmentStore for InMemoryAppointmentStore {
    fn insert(&self, draft: AppointmentDraft) -> Result<Appointment, StoreError> {
        let mut appointments = self.appointments.write().map_err(|_| StoreError::Poisoned)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let appointment = draft.with_id(id);
        appointments.insert(id, appointment.clone());
        Ok(appointment)
    }

    fn find_by_id(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let appointments = self.appointments.read().map_err(|_| StoreError::Poisoned)?;
        Ok(appointments.get(&id).cloned())
    }

    fn find_all(&self) -> Result<Vec<Appointment>, StoreError> {
        let appointments = self.appointments.read().map_err(|_| StoreError::Poisoned)?;
        let mut all: Vec<_> = appointments.values().cloned().collect();
        all.sort_by_key(|a| a.id);
        Ok(all)
    }

    fn update(&self, appointment: Appointment) -> Result<Option<Appointment>, StoreError> {
        let mut appointments = self.appointments.write().map_err(|_| StoreError::Poisoned)?;
        Ok(appointments.get_mut(&appointment.id).map(|slot| {
            *slot = appointment.clone();
            appointment
        }))
    }

    fn delete(&self, id: AppointmentId) -> Result<bool, StoreError> {
        let mut appointments = self.appointments.write().map_err(|_| StoreError::Poisoned)?;
        Ok(appointments.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn draft(treatment: &str) -> AppointmentDraft {
        AppointmentDraft {
            date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            treatment: treatment.into(),
            patient_name: "Ana Gomez".into(),
        }
    }

    #[test]
    fn crud_round() {
        let store = InMemoryAppointmentStore::new();
        let first = store.insert(draft("Cleaning")).unwrap();
        let second = store.insert(draft("Filling")).unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(store.find_all().unwrap(), vec![first.clone(), second]);

        let mut changed = first.clone();
        changed.treatment = "Extraction".into();
        assert_eq!(store.update(changed.clone()).unwrap(), Some(changed));

        assert!(store.delete(first.id).unwrap());
        assert_eq!(store.find_by_id(first.id).unwrap(), None);
        assert_eq!(store.update(first).unwrap(), None);
    }
}
