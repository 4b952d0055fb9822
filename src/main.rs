//! WiFi DPP Enrollee - Main Entry Point

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wifi_dpp_enrollee::{
    Outcome, ProvisioningSession, SessionSummary,
    backend::WifiCtrlBackend,
    config::{CliArgs, Settings},
};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wifi_dpp_enrollee=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(?args, "Starting WiFi DPP enrollee");

    // Validate configuration
    let settings = Settings::try_from(args).inspect_err(|e| error!("{}", e))?;

    let backend = Arc::new(WifiCtrlBackend::new(
        settings.interface.clone(),
        &settings.ctrl_dir,
    ));
    info!("DPP backend created for interface: {}", backend.interface());

    let session = ProvisioningSession::new(backend, settings.provisioning.clone());
    info!(session = %session.id(), "Provisioning session created");
    notify_ready();

    let summary = match session.run().await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Provisioning session failed: {}", e);
            notify_status(&format!("bring-up failed: {}", e));
            return Err(e.into());
        }
    };

    notify_status(&summary.outcome().to_string());
    report(&summary, settings.json_report)?;

    Ok(exit_code(summary.outcome()))
}

fn report(summary: &SessionSummary, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(&summary.report)?);
    } else {
        info!(
            outcome = %summary.report.outcome,
            auth_retries = summary.report.auth_retries,
            connect_retries = summary.report.connect_retries,
            "Provisioning finished"
        );
    }
    Ok(())
}

fn exit_code(outcome: Outcome) -> ExitCode {
    match outcome {
        Outcome::Connected => ExitCode::SUCCESS,
        Outcome::ConnectionFailed => ExitCode::from(2),
        Outcome::AuthenticationFailed => ExitCode::from(3),
        Outcome::UnexpectedState => ExitCode::from(4),
    }
}

#[cfg(feature = "systemd")]
fn notify_ready() {
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        tracing::warn!("Failed to notify systemd: {}", e);
    }
}

#[cfg(not(feature = "systemd"))]
fn notify_ready() {}

#[cfg(feature = "systemd")]
fn notify_status(status: &str) {
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Status(status)]) {
        tracing::warn!("Failed to notify systemd: {}", e);
    }
}

#[cfg(not(feature = "systemd"))]
fn notify_status(_status: &str) {}
