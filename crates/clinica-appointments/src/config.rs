//! Service configuration.
//!
//! Loading happens in three steps:
//! 1. parse the optional TOML file (missing tables and keys take defaults)
//! 2. apply `APPOINTMENTS_*` environment overrides
//! 3. validate
//!
//! The resilience timeout must leave room for every attempt to time out on
//! its own, plus the backoff pauses between them. Otherwise a hanging
//! patients service always surfaces as a timeout and retries never run out.
//!
//! ```toml
//! listen = "0.0.0.0:8082"
//!
//! [patients]
//! base_url = "http://patients:8081"
//! request_timeout_ms = 2000
//!
//! [resilience]
//! timeout_ms = 8000
//!
//! [resilience.retry]
//! max_attempts = 3
//! backoff = { kind = "exponential", initial_ms = 200, max_ms = 2000 }
//!
//! [resilience.circuit_breaker]
//! failure_rate_threshold = 0.5
//! sliding_window_type = "count_based"
//! sliding_window_size = 10
//! minimum_number_of_calls = 5
//! wait_duration_in_open_ms = 10000
//! ```

use clinica_resilience::{ConfigError, ResilienceSettings};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "APPOINTMENTS_";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Resilience(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppointmentsConfig {
    pub listen: SocketAddr,
    pub patients: PatientsClientConfig,
    pub resilience: ResilienceSettings,
}

impl Default for AppointmentsConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8082)),
            patients: PatientsClientConfig::default(),
            resilience: ResilienceSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PatientsClientConfig {
    pub base_url: String,
    /// Per HTTP request; the resilience timeout bounds all attempts together.
    pub request_timeout_ms: u64,
}

impl Default for PatientsClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            request_timeout_ms: 2_000,
        }
    }
}

impl PatientsClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl AppointmentsConfig {
    /// Reads `path` if given, then applies overrides from the process
    /// environment and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, LoadError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) with an explicit variable source.
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self, LoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, LoadError> {
        let contents = fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overrides recognised variables, for example `APPOINTMENTS_LISTEN` or
    /// `APPOINTMENTS_RETRY_MAX_ATTEMPTS`. Unparseable values are errors.
    pub fn apply_env_overrides<F>(&mut self, env: F) -> Result<(), LoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(&format!("{ENV_PREFIX}{name}")).map(|v| (name.to_string(), v));

        if let Some((name, value)) = var("LISTEN") {
            self.listen = parse(&name, value)?;
        }
        if let Some((_, value)) = var("PATIENTS_BASE_URL") {
            self.patients.base_url = value;
        }
        if let Some((name, value)) = var("PATIENTS_REQUEST_TIMEOUT_MS") {
            self.patients.request_timeout_ms = parse(&name, value)?;
        }

        let resilience = &mut self.resilience;
        if let Some((name, value)) = var("TIMEOUT_MS") {
            resilience.timeout_ms = parse(&name, value)?;
        }
        if let Some((name, value)) = var("RETRY_MAX_ATTEMPTS") {
            resilience.retry.max_attempts = parse(&name, value)?;
        }

        let cb = &mut resilience.circuit_breaker;
        if let Some((name, value)) = var("CB_FAILURE_RATE_THRESHOLD") {
            cb.failure_rate_threshold = parse(&name, value)?;
        }
        if let Some((name, value)) = var("CB_SLIDING_WINDOW_SIZE") {
            cb.sliding_window_size = parse(&name, value)?;
        }
        if let Some((name, value)) = var("CB_MINIMUM_NUMBER_OF_CALLS") {
            cb.minimum_number_of_calls = parse(&name, value)?;
        }
        if let Some((name, value)) = var("CB_WAIT_DURATION_IN_OPEN_MS") {
            cb.wait_duration_in_open_ms = parse(&name, value)?;
        }
        if let Some((name, value)) = var("CB_PERMITTED_CALLS_IN_HALF_OPEN") {
            cb.permitted_calls_in_half_open = parse(&name, value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.patients.base_url.trim().is_empty() {
            return Err(LoadError::Invalid("patients.base_url must not be empty".into()));
        }
        if self.patients.request_timeout_ms == 0 {
            return Err(LoadError::Invalid(
                "patients.request_timeout_ms must be at least 1".into(),
            ));
        }
        self.resilience.validate()?;

        let needed = self
            .resilience
            .retry
            .worst_case_duration(self.patients.request_timeout());
        if self.resilience.timeout() < needed {
            return Err(LoadError::Invalid(format!(
                "resilience.timeout_ms ({} ms) is shorter than the worst-case retry budget \
                 ({} ms for {} attempts of patients.request_timeout_ms plus backoff)",
                self.resilience.timeout_ms,
                needed.as_millis(),
                self.resilience.retry.max_attempts,
            )));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(name: &str, value: String) -> Result<T, LoadError> {
    value.trim().parse().map_err(|_| LoadError::InvalidEnv {
        var: format!("{ENV_PREFIX}{name}"),
        value,
    })
}
