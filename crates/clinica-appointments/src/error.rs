use crate::lookup::LookupError;
use crate::model::{AppointmentId, FieldErrors};
use crate::store::StoreError;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Why the patients service could not be consulted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnavailableCause {
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: LookupError },

    #[error("lookup rejected: {0}")]
    Rejected(LookupError),
}

#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("invalid appointment data")]
    Validation { fields: FieldErrors },

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("no appointment with id {id}")]
    NotFound { id: AppointmentId },

    #[error("no patient with document number {document}")]
    PatientNotFound { document: String },

    #[error("patients service unavailable for document {document}: {cause}")]
    DependencyUnavailable {
        document: String,
        cause: UnavailableCause,
    },

    #[error("patients service did not answer for document {document} within {after:?}")]
    DependencyTimeout { document: String, after: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppointmentError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppointmentError::Validation { .. } | AppointmentError::MalformedBody(_) => {
                StatusCode::BAD_REQUEST
            }
            AppointmentError::NotFound { .. } | AppointmentError::PatientNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            AppointmentError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppointmentError::DependencyTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppointmentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppointmentError::Validation { .. } | AppointmentError::MalformedBody(_) => "validation",
            AppointmentError::NotFound { .. } => "not_found",
            AppointmentError::PatientNotFound { .. } => "patient_not_found",
            AppointmentError::DependencyUnavailable { .. } => "dependency_unavailable",
            AppointmentError::DependencyTimeout { .. } => "dependency_timeout",
            AppointmentError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        AppointmentError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for AppointmentError {
    fn from(rejection: JsonRejection) -> Self {
        AppointmentError::MalformedBody(rejection.body_text())
    }
}

impl From<PathRejection> for AppointmentError {
    fn from(rejection: PathRejection) -> Self {
        AppointmentError::MalformedBody(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<&'a FieldErrors>,
}

impl IntoResponse for AppointmentError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let fields = match &self {
            AppointmentError::Validation { fields } => Some(fields),
            _ => None,
        };
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            fields,
        };
        (status, Json(body)).into_response()
    }
}
