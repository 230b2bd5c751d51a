//! Patient records and the request bodies that create or amend them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound, in characters, for first and last names.
pub const MAX_NAME_LEN: usize = 40;

pub type PatientId = u64;

/// A stored patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: PatientId,
    pub document_number: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: NaiveDate,
    pub phone: String,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
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

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Body of `POST /patients`. Every field is optional on the wire so that
/// missing values surface as field errors rather than decode failures.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub document_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
}

/// A creation request that passed validation; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientDraft {
    pub document_number: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: NaiveDate,
    pub phone: String,
}

impl PatientDraft {
    pub fn with_id(self, id: PatientId) -> Patient {
        Patient {
            id,
            document_number: self.document_number,
            first_name: self.first_name,
            last_name: self.last_name,
            birth_date: self.birth_date,
            phone: self.phone,
        }
    }
}

impl NewPatient {
    /// Checks every field, collecting all problems at once.
    ///
    /// `today` is the reference date for the birth date, which must be
    /// strictly in the past.
    pub fn validate(self, today: NaiveDate) -> Result<PatientDraft, FieldErrors> {
        let mut errors = FieldErrors::new();

        let document_number = required(&mut errors, "documentNumber", self.document_number);
        let first_name = required(&mut errors, "firstName", self.first_name);
        let last_name = required(&mut errors, "lastName", self.last_name);
        let phone = required(&mut errors, "phone", self.phone);
        check_name(&mut errors, "firstName", first_name.as_deref());
        check_name(&mut errors, "lastName", last_name.as_deref());

        let birth_date = match self.birth_date {
            None => {
                errors.add("birthDate", "is required");
                None
            }
            Some(date) if date >= today => {
                errors.add("birthDate", "must be in the past");
                None
            }
            Some(date) => Some(date),
        };

        match (document_number, first_name, last_name, birth_date, phone) {
            (Some(document_number), Some(first_name), Some(last_name), Some(birth_date), Some(phone))
                if errors.is_empty() =>
            {
                Ok(PatientDraft {
                    document_number: document_number.trim().to_string(),
                    first_name,
                    last_name,
                    birth_date,
                    phone,
                })
            }
            _ => Err(errors),
        }
    }
}

/// Body of `PATCH /patients/{id}`. Absent or blank fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

impl PatientUpdate {
    /// Applies the supplied fields to `patient`. Nothing is changed when any
    /// supplied field is invalid.
    pub fn apply_to(self, patient: &mut Patient) -> Result<(), FieldErrors> {
        let first_name = supplied(self.first_name);
        let last_name = supplied(self.last_name);
        let phone = supplied(self.phone);

        let mut errors = FieldErrors::new();
        check_name(&mut errors, "firstName", first_name.as_deref());
        check_name(&mut errors, "lastName", last_name.as_deref());
        if !errors.is_empty() {
            return Err(errors);
        }

        if let Some(first_name) = first_name {
            patient.first_name = first_name;
        }
        if let Some(last_name) = last_name {
            patient.last_name = last_name;
        }
        if let Some(phone) = phone {
            patient.phone = phone;
        }
        Ok(())
    }
}

fn supplied(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(errors: &mut FieldErrors, field: &str, value: Option<String>) -> Option<String> {
    let value = supplied(value);
    if value.is_none() {
        errors.add(field, "is required");
    }
    value
}

fn check_name(errors: &mut FieldErrors, field: &str, value: Option<&str>) {
    if let Some(value) = value {
        if value.chars().count() > MAX_NAME_LEN {
            errors.add(field, format!("must be at most {MAX_NAME_LEN} characters"));
        }
    }
}
