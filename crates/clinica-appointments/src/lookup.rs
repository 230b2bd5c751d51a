//! Outbound patient lookup.
//!
//! [`PatientLookup`] is the transport seam; [`HttpPatientLookup`] is the
//! shipped implementation and [`LookupService`] adapts any lookup into a
//! Tower service so the resilience layers can wrap it.

use crate::model::PatientRef;
use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tower::Service;

/// Failure to obtain an answer from the patients service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("could not connect to patients service: {0}")]
    Connect(String),

    #[error("patients service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("patients service answered {status}")]
    Upstream { status: u16 },

    #[error("request to patients service failed: {0}")]
    Transport(String),

    #[error("unexpected status {status} from patients service")]
    UnexpectedStatus { status: u16 },

    #[error("undecodable patient payload: {0}")]
    Decode(String),
}

impl LookupError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LookupError::Connect(_)
                | LookupError::Timeout(_)
                | LookupError::Upstream { .. }
                | LookupError::Transport(_)
        )
    }
}

/// Fetches a patient by document number.
///
/// `Ok(None)` means the patients service affirmatively reported no match.
#[async_trait]
pub trait PatientLookup: Send + Sync {
    async fn find_by_document(&self, document_number: &str)
        -> Result<Option<PatientRef>, LookupError>;
}

/// [`PatientLookup`] over `GET {base}/patients/document/{doc}`.
#[derive(Debug, Clone)]
pub struct HttpPatientLookup {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid patients base url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

impl HttpPatientLookup {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ClientBuildError> {
        let parsed = Url::parse(base_url).map_err(|e| ClientBuildError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(ClientBuildError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base url".into(),
            });
        }
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: parsed,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn document_url(&self, document_number: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["patients", "document", document_number]);
        }
        url
    }

    fn classify(&self, err: reqwest::Error) -> LookupError {
        if err.is_timeout() {
            LookupError::Timeout(self.request_timeout)
        } else if err.is_connect() {
            LookupError::Connect(err.to_string())
        } else if err.is_decode() {
            LookupError::Decode(err.to_string())
        } else {
            LookupError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl PatientLookup for HttpPatientLookup {
    async fn find_by_document(
        &self,
        document_number: &str,
    ) -> Result<Option<PatientRef>, LookupError> {
        let url = self.document_url(document_number);
        tracing::debug!(%url, "looking up patient");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let patient = response
                    .json::<PatientRef>()
                    .await
                    .map_err(|e| self.classify(e))?;
                Ok(Some(patient))
            }
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_server_error() => Err(LookupError::Upstream { status: s.as_u16() }),
            s => Err(LookupError::UnexpectedStatus { status: s.as_u16() }),
        }
    }
}

/// Tower adapter over a shared [`PatientLookup`]; requests are document numbers.
#[derive(Clone)]
pub struct LookupService {
    lookup: Arc<dyn PatientLookup>,
}

impl LookupService {
    pub fn new(lookup: Arc<dyn PatientLookup>) -> Self {
        Self { lookup }
    }
}

impl Service<String> for LookupService {
    type Response = Option<PatientRef>;
    type Error = LookupError;
    type Future = BoxFuture<'static, Result<Option<PatientRef>, LookupError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, document_number: String) -> Self::Future {
        let lookup = Arc::clone(&self.lookup);
        Box::pin(async move { lookup.find_by_document(&document_number).await })
    }
}
