//! HTTP surface of the patients service.

use crate::error::PatientError;
use crate::model::{NewPatient, Patient, PatientId, PatientUpdate};
use crate::service::PatientService;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub patients: PatientService,
}

pub fn router(patients: PatientService) -> Router {
    Router::new()
        .route("/patients", get(list_patients).post(create_patient))
        .route(
            "/patients/:id",
            get(get_patient).patch(update_patient).delete(delete_patient),
        )
        .route("/patients/document/:document", get(get_by_document))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { patients })
}

async fn create_patient(
    State(state): State<AppState>,
    body: Result<Json<NewPatient>, JsonRejection>,
) -> Result<(StatusCode, Json<Patient>), PatientError> {
    let Json(request) = body?;
    let patient = state.patients.create(request)?;
    Ok((StatusCode::CREATED, Json(patient)))
}

async fn list_patients(State(state): State<AppState>) -> Result<Json<Vec<Patient>>, PatientError> {
    Ok(Json(state.patients.list()?))
}

async fn get_patient(
    State(state): State<AppState>,
    path: Result<Path<PatientId>, PathRejection>,
) -> Result<Json<Patient>, PatientError> {
    let Path(id) = path?;
    Ok(Json(state.patients.get(id)?))
}

async fn get_by_document(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Patient>, PatientError> {
    let Path(document) = path?;
    Ok(Json(state.patients.get_by_document(&document)?))
}

async fn update_patient(
    State(state): State<AppState>,
    path: Result<Path<PatientId>, PathRejection>,
    body: Result<Json<PatientUpdate>, JsonRejection>,
) -> Result<Json<Patient>, PatientError> {
    let Path(id) = path?;
    let Json(update) = body?;
    Ok(Json(state.patients.update(id, update)?))
}

async fn delete_patient(
    State(state): State<AppState>,
    path: Result<Path<PatientId>, PathRejection>,
) -> Result<StatusCode, PatientError> {
    let Path(id) = path?;
    state.patients.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPatientStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        router(PatientService::new(Arc::new(InMemoryPatientStore::new())))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn alejandra() -> Value {
        json!({
            "documentNumber": "123456789",
            "firstName": "Alejandra",
            "lastName": "Martinez",
            "birthDate": "1990-05-17",
            "phone": "555-0100"
        })
    }

    #[tokio::test]
    async fn create_and_fetch_by_document() {
        let app = app();
        let (status, created) = send(&app, post_json("/patients", alejandra())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["id"], 1);

        let request = Request::get("/patients/document/123456789")
            .body(Body::empty())
            .unwrap();
        let (status, found) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["firstName"], "Alejandra");
    }

    #[tokio::test]
    async fn unknown_document_is_404() {
        let request = Request::get("/patients/document/987654321")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app(), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn validation_errors_list_fields() {
        let (status, body) = send(&app(), post_json("/patients", json!({ "firstName": "Ana" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
        assert_eq!(body["fields"]["documentNumber"], "is required");
        assert!(body["fields"].get("firstName").is_none());
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let request = Request::post("/patients")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn non_numeric_id_is_a_json_400() {
        let request = Request::get("/patients/abc").body(Body::empty()).unwrap();
        let (status, body) = send(&app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn duplicate_document_is_409() {
        let app = app();
        send(&app, post_json("/patients", alejandra())).await;
        let (status, body) = send(&app, post_json("/patients", alejandra())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn empty_list_is_an_empty_array() {
        let request = Request::get("/patients").body(Body::empty()).unwrap();
        let (status, body) = send(&app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn patch_then_delete() {
        let app = app();
        send(&app, post_json("/patients", alejandra())).await;

        let request = Request::patch("/patients/1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "phone": "555-0199", "firstName": " " }).to_string()))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phone"], "555-0199");
        assert_eq!(body["firstName"], "Alejandra");

        let request = Request::delete("/patients/1").body(Body::empty()).unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let request = Request::get("/patients/1").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "no patient with id 1");
    }
}
