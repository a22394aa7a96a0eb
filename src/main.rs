use std::path::PathBuf;

use assessment_relay::config::Configuration;
use assessment_relay::{app, initialize_state, telemetry};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // `.env` is optional.
    dotenvy::dotenv().ok();
    telemetry::setup_tracing();

    let path = std::env::var("CONFIG_PATH").map(PathBuf::from).unwrap_or_default();
    let config = match Configuration::default().path(path).read() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        },
    };

    if let Some(address) = config.metrics_address {
        if let Err(err) = telemetry::setup_metrics_recorder(address) {
            tracing::warn!(error = %err, "prometheus exporter not started");
        }
    }

    let address = format!("{}:{}", config.host, config.port);
    let state = initialize_state(config);

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %address, "cannot bind listener");
            std::process::exit(1);
        },
    };
    tracing::info!(%address, "server started");

    if let Err(err) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server stopped unexpectedly");
        std::process::exit(1);
    }
}

/// Wait for `SIGTERM` (sent by the hosting platform) or `Ctrl+C`.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl+c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for sigterm");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received, draining requests");
}
