//! Appointments service.
//!
//! Creating an appointment resolves the patient by document number through
//! [`ResilientPatientLookup`], which wraps the HTTP client in a time limit,
//! fallback, retry and circuit breaker. A patient the patients service does
//! not know is [`AppointmentError::PatientNotFound`]; a patients service that
//! cannot answer is [`AppointmentError::DependencyUnavailable`] or
//! [`AppointmentError::DependencyTimeout`].
//!
//! ```no_run
//! use clinica_appointments::{
//!     router, AppointmentService, AppointmentsConfig, HttpPatientLookup,
//!     InMemoryAppointmentStore, ResilientPatientLookup,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AppointmentsConfig::load(None)?;
//! let http = HttpPatientLookup::new(&config.patients.base_url, config.patients.request_timeout())?;
//! let patients = ResilientPatientLookup::new(Arc::new(http), &config.resilience);
//! let service = AppointmentService::new(Arc::new(InMemoryAppointmentStore::new()), Arc::new(patients));
//! let app: axum::Router = router(service);
//! # drop(app);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod lookup;
pub mod model;
pub mod resilient;
pub mod routes;
pub mod service;
pub mod store;

pub use config::{AppointmentsConfig, LoadError, PatientsClientConfig};
pub use error::{AppointmentError, UnavailableCause};
pub use lookup::{ClientBuildError, HttpPatientLookup, LookupError, LookupService, PatientLookup};
pub use model::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentRequest, AppointmentUpdate,
    FieldErrors, NewAppointment, PatientRef,
};
pub use resilient::{PatientsBreaker, ResilientPatientLookup};
pub use routes::{router, AppState};
pub use service::AppointmentService;
pub use store::{AppointmentStore, InMemoryAppointmentStore, StoreError};
