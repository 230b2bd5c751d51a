use crate::error::AppointmentError;
use crate::model::{Appointment, AppointmentDraft, AppointmentId, AppointmentUpdate, NewAppointment};
use crate::resilient::ResilientPatientLookup;
use crate::store::AppointmentStore;
use std::sync::Arc;

/// Appointment use cases; creation resolves the patient remotely.
#[derive(Clone)]
pub struct AppointmentService {
    store: Arc<dyn AppointmentStore>,
    patients: Arc<ResilientPatientLookup>,
}

impl AppointmentService {
    pub fn new(store: Arc<dyn AppointmentStore>, patients: Arc<ResilientPatientLookup>) -> Self {
        Self { store, patients }
    }

    pub fn patients(&self) -> &ResilientPatientLookup {
        &self.patients
    }

    /// Validates the request, resolves the patient and stores the appointment.
    ///
    /// Invalid requests fail before any remote call. An absent patient is
    /// [`AppointmentError::PatientNotFound`]; failures of the patients service
    /// surface as returned by [`ResilientPatientLookup::resolve`]. Nothing is
    /// stored unless the patient was found.
    pub async fn create(&self, request: NewAppointment) -> Result<Appointment, AppointmentError> {
        let request = request
            .validate()
            .map_err(|fields| AppointmentError::Validation { fields })?;

        let patient = self
            .patients
            .resolve(&request.document_number)
            .await?
            .ok_or_else(|| AppointmentError::PatientNotFound {
                document: request.document_number.clone(),
            })?;

        let draft = AppointmentDraft::for_patient(request, &patient)
            .map_err(|fields| AppointmentError::Validation { fields })?;
        let appointment = self.store.insert(draft)?;
        tracing::info!(
            appointment_id = appointment.id,
            patient = %appointment.patient_name,
            "appointment created"
        );
        Ok(appointment)
    }

    pub fn list(&self) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self.store.find_all()?)
    }

    pub fn get(&self, id: AppointmentId) -> Result<Appointment, AppointmentError> {
        self.store
            .find_by_id(id)?
            .ok_or(AppointmentError::NotFound { id })
    }

    pub fn update(
        &self,
        id: AppointmentId,
        update: AppointmentUpdate,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.get(id)?;
        update
            .apply_to(&mut appointment)
            .map_err(|fields| AppointmentError::Validation { fields })?;
        let updated = self
            .store
            .update(appointment)?
            .ok_or(AppointmentError::NotFound { id })?;
        tracing::info!(appointment_id = id, "appointment updated");
        Ok(updated)
    }

    pub fn delete(&self, id: AppointmentId) -> Result<(), AppointmentError> {
        if self.store.delete(id)? {
            tracing::info!(appointment_id = id, "appointment deleted");
            Ok(())
        } else {
            Err(AppointmentError::NotFound { id })
        }
    }
}
