use crate::error::PatientError;
use crate::model::{NewPatient, Patient, PatientId, PatientUpdate};
use crate::store::PatientStore;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;

/// Patient use cases over a [`PatientStore`].
#[derive(Clone)]
pub struct PatientService {
    store: Arc<dyn PatientStore>,
    today: fn() -> NaiveDate,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

impl PatientService {
    pub fn new(store: Arc<dyn PatientStore>) -> Self {
        Self {
            store,
            today: utc_today,
        }
    }

    /// Uses `today` as the reference date for birth date checks.
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn create(&self, request: NewPatient) -> Result<Patient, PatientError> {
        let draft = request
            .validate((self.today)())
            .map_err(|fields| PatientError::Validation { fields })?;
        let patient = self.store.insert(draft)?;
        tracing::info!(patient_id = patient.id, "patient created");
        Ok(patient)
    }

    pub fn list(&self) -> Result<Vec<Patient>, PatientError> {
        Ok(self.store.find_all()?)
    }

    pub fn get(&self, id: PatientId) -> Result<Patient, PatientError> {
        self.store
            .find_by_id(id)?
            .ok_or(PatientError::NotFound { id })
    }

    pub fn get_by_document(&self, document_number: &str) -> Result<Patient, PatientError> {
        self.store
            .find_by_document(document_number)?
            .ok_or_else(|| PatientError::DocumentNotFound {
                document: document_number.to_string(),
            })
    }

    pub fn update(&self, id: PatientId, update: PatientUpdate) -> Result<Patient, PatientError> {
        let mut patient = self.get(id)?;
        update
            .apply_to(&mut patient)
            .map_err(|fields| PatientError::Validation { fields })?;
        let updated = self
            .store
            .update(patient)?
            .ok_or(PatientError::NotFound { id })?;
        tracing::info!(patient_id = id, "patient updated");
        Ok(updated)
    }

    pub fn delete(&self, id: PatientId) -> Result<(), PatientError> {
        if self.store.delete(id)? {
            tracing::info!(patient_id = id, "patient deleted");
            Ok(())
        } else {
            Err(PatientError::NotFound { id })
        }
    }
}
