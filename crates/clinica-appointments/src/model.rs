//! Appointment records, creation requests and the patient projection used to
//! fill in the patient's name.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MAX_TREATMENT_LEN: usize = 60;
pub const MAX_PATIENT_NAME_LEN: usize = 40;

pub type AppointmentId = u64;

/// Read-only view of a patient as returned by the patients service.
///
/// Only the names are used; the other fields are carried for logging and
/// tolerate being absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRef {
    #[serde(default)]
    pub id: Option<u64>,
    pub document_number: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl PatientRef {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: AppointmentId,
    pub date: NaiveDate,
    pub treatment: String,
    /// Snapshot of the patient's full name when the appointment was made.
    pub patient_name: String,
}

/// Field name to message, ordered for stable responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }
}

/// Body of `POST /appointments`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    pub date: Option<NaiveDate>,
    pub treatment: Option<String>,
    pub document_number: Option<String>,
}

/// A creation request whose fields are present and within bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentRequest {
    pub date: NaiveDate,
    pub treatment: String,
    pub document_number: String,
}

impl NewAppointment {
    pub fn validate(self) -> Result<AppointmentRequest, FieldErrors> {
        let mut errors = FieldErrors::new();

        if self.date.is_none() {
            errors.add("date", "is required");
        }
        let treatment = supplied(self.treatment);
        match &treatment {
            None => errors.add("treatment", "is required"),
            Some(t) => check_treatment(&mut errors, t),
        }
        let document_number = supplied(self.document_number).map(|d| d.trim().to_string());
        if document_number.is_none() {
            errors.add("documentNumber", "is required");
        }

        match (self.date, treatment, document_number) {
            (Some(date), Some(treatment), Some(document_number)) if errors.is_empty() => {
                Ok(AppointmentRequest {
                    date,
                    treatment,
                    document_number,
                })
            }
            _ => Err(errors),
        }
    }
}

/// A validated appointment bound to a resolved patient, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentDraft {
    pub date: NaiveDate,
    pub treatment: String,
    pub patient_name: String,
}

impl AppointmentDraft {
    /// Copies the patient's full name into the draft. The name must be
    /// non-blank and fit [`MAX_PATIENT_NAME_LEN`].
    pub fn for_patient(request: AppointmentRequest, patient: &PatientRef) -> Result<Self, FieldErrors> {
        let patient_name = patient.full_name();
        let mut errors = FieldErrors::new();
        if patient_name.trim().is_empty() {
            errors.add("patientName", "is required");
        } else if patient_name.chars().count() > MAX_PATIENT_NAME_LEN {
            errors.add(
                "patientName",
                format!("must be at most {MAX_PATIENT_NAME_LEN} characters"),
            );
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Self {
            date: request.date,
            treatment: request.treatment,
            patient_name,
        })
    }

    pub fn with_id(self, id: AppointmentId) -> Appointment {
        Appointment {
            id,
            date: self.date,
            treatment: self.treatment,
            patient_name: self.patient_name,
        }
    }
}

/// Body of `PATCH /appointments/{id}`. Absent or blank fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentUpdate {
    pub date: Option<NaiveDate>,
    pub treatment: Option<String>,
}

impl AppointmentUpdate {
    pub fn apply_to(self, appointment: &mut Appointment) -> Result<(), FieldErrors> {
        let treatment = supplied(self.treatment);
        let mut errors = FieldErrors::new();
        if let Some(t) = &treatment {
            check_treatment(&mut errors, t);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        if let Some(date) = self.date {
            appointment.date = date;
        }
        if let Some(treatment) = treatment {
            appointment.treatment = treatment;
        }
        Ok(())
    }
}

fn supplied(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn check_treatment(errors: &mut FieldErrors, treatment: &str) {
    if treatment.chars().count() > MAX_TREATMENT_LEN {
        errors.add(
            "treatment",
            format!("must be at most {MAX_TREATMENT_LEN} characters"),
        );
    }
}
