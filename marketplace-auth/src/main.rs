use marketplace_auth::{config::AuthConfig, AuthRuntime};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.common.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.common.service_name,
        environment = ?config.environment,
        secure_mode = config.mode.secure_mode_enabled,
        "Starting authentication orchestrator"
    );

    let runtime = AuthRuntime::from_config(&config).await?;

    let report = runtime.orchestrator().health_check().await;
    tracing::info!(
        mode = %report.mode,
        hardened = ?report.hardened,
        "Initial health report"
    );

    wait_for_shutdown(&runtime).await;

    runtime.shutdown(Duration::from_secs(10)).await;
    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Serve operator signals until asked to stop. SIGHUP reloads the mode flag.
async fn wait_for_shutdown(runtime: &AuthRuntime) {
    #[cfg(unix)]
    {
        let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())
            .expect("failed to install SIGHUP handler");
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler");

        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("Received SIGINT, starting graceful shutdown");
                    return;
                },
                _ = terminate.recv() => {
                    tracing::info!("Received SIGTERM, starting graceful shutdown");
                    return;
                },
                _ = hangup.recv() => match runtime.reload_mode() {
                    Ok(mode) => tracing::info!(mode = %mode, "Mode flag reloaded"),
                    Err(e) => tracing::error!(error = %e, "Mode flag reload failed, keeping current mode"),
                },
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = runtime;
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        tracing::info!("Received Ctrl+C, starting graceful shutdown");
    }
}
