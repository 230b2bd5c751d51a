//! Standalone appointments service.

use clap::Parser;
use clinica_appointments::{
    router, AppointmentService, AppointmentsConfig, HttpPatientLookup, InMemoryAppointmentStore,
    ResilientPatientLookup,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "appointments-service", about = "Appointments over HTTP")]
struct Args {
    /// TOML configuration file; APPOINTMENTS_* variables override it.
    #[arg(long, env = "APPOINTMENTS_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "APPOINTMENTS_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,tower_http=debug"))?;
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json)?;

    let config = AppointmentsConfig::load(args.config.as_deref())?;
    tracing::info!(
        patients = %config.patients.base_url,
        max_attempts = config.resilience.retry.max_attempts,
        timeout_ms = config.resilience.timeout_ms,
        "configuration loaded"
    );

    let http = HttpPatientLookup::new(&config.patients.base_url, config.patients.request_timeout())?;
    let patients = ResilientPatientLookup::new(Arc::new(http), &config.resilience);
    let service = AppointmentService::new(
        Arc::new(InMemoryAppointmentStore::new()),
        Arc::new(patients),
    );

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!(addr = %listener.local_addr()?, "appointments service listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
