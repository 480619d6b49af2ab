//! Prefab Gateway Server Entry Point
//!
//! Bootstraps telemetry and configuration, assembles the components,
//! starts the workspace reclaimer and serves the Axum router until ctrl-c.

use std::net::SocketAddr;

use tokio::sync::watch;

use prefab_gateway::constants::DEFAULT_PORT;
use prefab_gateway::jobs::{workspace_reclaim_task, WorkspaceReclaimConfig};
use prefab_gateway::routes::validate_for_production;
use prefab_gateway::telemetry::{init_tracer, shutdown_tracer, TelemetryConfig};
use prefab_gateway::{create_api_router, ApiError, ApiResult, AppState, AuthConfig, GatewayConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let config = GatewayConfig::from_env();
    let auth_config = AuthConfig::from_env();
    auth_config.validate_for_production(config.is_production())?;
    validate_for_production(&config, &auth_config)?;

    let state = AppState::from_config(config, auth_config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reclaimer = match WorkspaceReclaimConfig::from_workspace(&state.config.workspace) {
        Some(reclaim_config) if state.workspaces.is_staging() => Some(tokio::spawn(
            workspace_reclaim_task(reclaim_config, state.reclaim_metrics.clone(), shutdown_rx),
        )),
        _ => {
            tracing::info!("Workspace staging disabled; reclaimer not started");
            None
        }
    };

    let app = create_api_router(state)?;

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting prefab gateway");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = reclaimer {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Workspace reclaimer ended abnormally");
        }
    }

    shutdown_tracer();
    Ok(())
}

/// Resolves on ctrl-c or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// `PREFAB_BIND_ADDR` wins when set; otherwise `0.0.0.0:$PORT`.
fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    if let Ok(addr) = std::env::var("PREFAB_BIND_ADDR") {
        return addr.parse::<SocketAddr>().map_err(|e| {
            ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e))
        });
    }

    let port = match std::env::var("PORT") {
        Ok(port_str) => port_str
            .parse::<u16>()
            .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?,
        Err(_) => DEFAULT_PORT,
    };
    Ok(SocketAddr::from(([0, 0, 0, 0], port)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::signal::unix::{signal, SignalKind};

    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        // Handler installed up front so an early signal is not fatal.
        let _installed = signal(SignalKind::terminate()).unwrap();

        let waiter = tokio::spawn(shutdown_signal());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("shutdown future did not resolve on SIGTERM")
            .unwrap();
    }
}
