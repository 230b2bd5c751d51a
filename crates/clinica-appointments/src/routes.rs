//! HTTP surface of the appointments service.

use crate::error::AppointmentError;
use crate::model::{Appointment, AppointmentId, AppointmentUpdate, NewAppointment};
use crate::service::AppointmentService;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub appointments: AppointmentService,
}

pub fn router(appointments: AppointmentService) -> Router {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route(
            "/appointments/:id",
            get(get_appointment)
                .patch(update_appointment)
                .delete(delete_appointment),
        )
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { appointments })
}

async fn create_appointment(
    State(state): State<AppState>,
    body: Result<Json<NewAppointment>, JsonRejection>,
) -> Result<(StatusCode, Json<Appointment>), AppointmentError> {
    let Json(request) = body?;
    let appointment = state.appointments.create(request).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn list_appointments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Appointment>>, AppointmentError> {
    Ok(Json(state.appointments.list()?))
}

async fn get_appointment(
    State(state): State<AppState>,
    path: Result<Path<AppointmentId>, PathRejection>,
) -> Result<Json<Appointment>, AppointmentError> {
    let Path(id) = path?;
    Ok(Json(state.appointments.get(id)?))
}

async fn update_appointment(
    State(state): State<AppState>,
    path: Result<Path<AppointmentId>, PathRejection>,
    body: Result<Json<AppointmentUpdate>, JsonRejection>,
) -> Result<Json<Appointment>, AppointmentError> {
    let Path(id) = path?;
    let Json(update) = body?;
    Ok(Json(state.appointments.update(id, update)?))
}

async fn delete_appointment(
    State(state): State<AppState>,
    path: Result<Path<AppointmentId>, PathRejection>,
) -> Result<StatusCode, AppointmentError> {
    let Path(id) = path?;
    state.appointments.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// 200 unless the patients breaker is open, with a snapshot of its window.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let breaker = state.appointments.patients().breaker();
    let metrics = breaker.metrics().await;
    let status =
        StatusCode::from_u16(breaker.http_status()).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    let body = json!({
        "status": breaker.health_status(),
        "dependencies": {
            (breaker.name()): {
                "state": metrics.state,
                "failureRate": metrics.failure_rate,
                "calls": metrics.total_calls,
                "failures": metrics.failure_count,
                "sinceStateChangeMs": metrics.time_since_state_change.as_millis() as u64,
            }
        }
    });
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupError, PatientLookup};
    use crate::model::PatientRef;
    use crate::resilient::ResilientPatientLookup;
    use crate::store::InMemoryAppointmentStore;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use clinica_resilience::{Backoff, ResilienceSettings};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Directory;

    #[async_trait]
    impl PatientLookup for Directory {
        async fn find_by_document(&self, document: &str) -> Result<Option<PatientRef>, LookupError> {
            match document {
                "123456789" => Ok(Some(PatientRef {
                    id: Some(1),
                    document_number: document.into(),
                    first_name: "Alejandra".into(),
                    last_name: "Martinez".into(),
                    birth_date: None,
                    phone: None,
                })),
                "down" => Err(LookupError::Connect("connection refused".into())),
                _ => Ok(None),
            }
        }
    }

    fn app() -> (Router, AppointmentService) {
        let mut settings = ResilienceSettings::default();
        settings.retry.backoff = Backoff::fixed(Duration::from_millis(1));
        settings.circuit_breaker.sliding_window_size = 3;
        settings.circuit_breaker.minimum_number_of_calls = 3;
        let patients = ResilientPatientLookup::new(Arc::new(Directory), &settings);
        let service = AppointmentService::new(
            Arc::new(InMemoryAppointmentStore::new()),
            Arc::new(patients),
        );
        (router(service.clone()), service)
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

    fn create(document: &str) -> Request<Body> {
        let body = json!({
            "date": "2025-09-01",
            "treatment": "Cleaning",
            "documentNumber": document,
        });
        Request::post("/appointments")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn create_returns_201_with_patient_name() {
        let (app, _) = app();
        let (status, body) = send(&app, create("123456789")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["patientName"], "Alejandra Martinez");
        assert_eq!(body["date"], "2025-09-01");
    }

    #[tokio::test]
    async fn missing_patient_is_404_with_its_own_kind() {
        let (app, service) = app();
        let (status, body) = send(&app, create("987654321")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "patient_not_found");
        assert!(body["message"].as_str().unwrap().contains("987654321"));
        assert!(service.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_dependency_is_503() {
        let (app, _) = app();
        let (status, body) = send(&app, create("down")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "dependency_unavailable");
        assert!(body["message"].as_str().unwrap().contains("down"));
    }

    #[tokio::test]
    async fn validation_failure_lists_fields() {
        let (app, _) = app();
        let request = Request::post("/appointments")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "treatment": "x".repeat(61) }).to_string()))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"]["treatment"], "must be at most 60 characters");
        assert_eq!(body["fields"]["date"], "is required");
    }

    #[tokio::test]
    async fn local_not_found_uses_not_found_kind() {
        let (app, _) = app();
        let request = Request::get("/appointments/9").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn non_numeric_id_is_a_json_400() {
        let (app, _) = app();
        for request in [
            Request::get("/appointments/abc").body(Body::empty()).unwrap(),
            Request::delete("/appointments/-1").body(Body::empty()).unwrap(),
        ] {
            let (status, body) = send(&app, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "validation");
            assert!(body["message"].is_string());
        }
    }

    #[tokio::test]
    async fn health_follows_breaker_state() {
        let (app, _) = app();
        let health = || Request::get("/health").body(Body::empty()).unwrap();

        let (status, body) = send(&app, health()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["dependencies"]["patients"]["state"], "CLOSED");

        // three attempts, all failing, fill the window
        send(&app, create("down")).await;

        let (status, body) = send(&app, health()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["dependencies"]["patients"]["state"], "OPEN");
    }
}
