//! Patient records service.
//!
//! Validation, an in-memory store behind [`PatientStore`], and the axum
//! router served by the `patients-service` binary. The appointments service
//! resolves patients through `GET /patients/document/{doc}`.
//!
//! ```
//! use clinica_patients::{router, InMemoryPatientStore, PatientService};
//! use std::sync::Arc;
//!
//! let service = PatientService::new(Arc::new(InMemoryPatientStore::new()));
//! let app: axum::Router = router(service);
//! # drop(app);
//! ```

pub mod error;
pub mod model;
pub mod routes;
pub mod service;
pub mod store;

pub use error::PatientError;
pub use model::{FieldErrors, NewPatient, Patient, PatientDraft, PatientId, PatientUpdate};
pub use routes::{router, AppState};
pub use service::PatientService;
pub use store::{InMemoryPatientStore, PatientStore, StoreError};
