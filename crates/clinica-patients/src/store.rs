//! Patient persistence.

use crate::model::{Patient, PatientDraft, PatientId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("a patient with document number {0} already exists")]
    DuplicateDocument(String),
    #[error("patient store lock poisoned")]
    Poisoned,
}

/// Keyed storage for patients.
///
/// Document numbers are unique; `insert` enforces this atomically.
pub trait PatientStore: Send + Sync {
    fn insert(&self, draft: PatientDraft) -> Result<Patient, StoreError>;
    fn find_by_id(&self, id: PatientId) -> Result<Option<Patient>, StoreError>;
    fn find_by_document(&self, document_number: &str) -> Result<Option<Patient>, StoreError>;
    /// All patients ordered by id.
    fn find_all(&self) -> Result<Vec<Patient>, StoreError>;
    /// Replaces a stored patient; `None` if the id is unknown.
    fn update(&self, patient: Patient) -> Result<Option<Patient>, StoreError>;
    /// Returns whether a patient was removed.
    fn delete(&self, id: PatientId) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPatientStore {
    patients: RwLock<HashMap<PatientId, Patient>>,
    next_id: AtomicU64,
}

impl InMemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatientStore for InMemoryPatientStore {
    fn insert(&self, draft: PatientDraft) -> Result<Patient, StoreError> {
        let mut patients = self.patients.write().map_err(|_| StoreError::Poisoned)?;
        if patients
            .values()
            .any(|p| p.document_number == draft.document_number)
        {
            return Err(StoreError::DuplicateDocument(draft.document_number));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let patient = draft.with_id(id);
        patients.insert(id, patient.clone());
        Ok(patient)
    }

    fn find_by_id(&self, id: PatientId) -> Result<Option<Patient>, StoreError> {
        let patients = self.patients.read().map_err(|_| StoreError::Poisoned)?;
        Ok(patients.get(&id).cloned())
    }

    fn find_by_document(&self, document_number: &str) -> Result<Option<Patient>, StoreError> {
        let patients = self.patients.read().map_err(|_| StoreError::Poisoned)?;
        Ok(patients
            .values()
            .find(|p| p.document_number == document_number)
            .cloned())
    }

    fn find_all(&self) -> Result<Vec<Patient>, StoreError> {
        let patients = self.patients.read().map_err(|_| StoreError::Poisoned)?;
        let mut all: Vec<Patient> = patients.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    fn update(&self, patient: Patient) -> Result<Option<Patient>, StoreError> {
        let mut patients = self.patients.write().map_err(|_| StoreError::Poisoned)?;
        match patients.get_mut(&patient.id) {
            Some(slot) => {
                *slot = patient.clone();
                Ok(Some(patient))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, id: PatientId) -> Result<bool, StoreError> {
        let mut patients = self.patients.write().map_err(|_| StoreError::Poisoned)?;
        Ok(patients.remove(&id).is_some())
    }
}
