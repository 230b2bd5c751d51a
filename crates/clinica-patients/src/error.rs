use crate::model::{FieldErrors, PatientId};
use crate::store::StoreError;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatientError {
    #[error("invalid patient data")]
    Validation { fields: FieldErrors },

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("no patient with id {id}")]
    NotFound { id: PatientId },

    #[error("no patient with document number {document}")]
    DocumentNotFound { document: String },

    #[error("a patient with document number {document} already exists")]
    Conflict { document: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl PatientError {
    pub fn status(&self) -> StatusCode {
        match self {
            PatientError::Validation { .. } | PatientError::MalformedBody(_) => {
                StatusCode::BAD_REQUEST
            }
            PatientError::NotFound { .. } | PatientError::DocumentNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            PatientError::Conflict { .. } => StatusCode::CONFLICT,
            PatientError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PatientError::Validation { .. } | PatientError::MalformedBody(_) => "validation",
            PatientError::NotFound { .. } | PatientError::DocumentNotFound { .. } => "not_found",
            PatientError::Conflict { .. } => "conflict",
            PatientError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for PatientError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateDocument(document) => PatientError::Conflict { document },
            StoreError::Poisoned => PatientError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for PatientError {
    fn from(rejection: JsonRejection) -> Self {
        PatientError::MalformedBody(rejection.body_text())
    }
}

impl From<PathRejection> for PatientError {
    fn from(rejection: PathRejection) -> Self {
        PatientError::MalformedBody(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<&'a FieldErrors>,
}

impl IntoResponse for PatientError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let fields = match &self {
            PatientError::Validation { fields } => Some(fields),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_http_kinds() {
        let err = PatientError::from(StoreError::DuplicateDocument("9".into()));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.kind(), "conflict");
        assert_eq!(err.to_string(), "a patient with document number 9 already exists");

        let err = PatientError::from(StoreError::Poisoned);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn document_not_found_names_the_document() {
        let err = PatientError::DocumentNotFound {
            document: "987654321".into(),
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("987654321"));
    }
}
