//! Gatehouse entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use gatehouse_server::telemetry::{self, LogFormat};
use gatehouse_server::{run, ServerArgs};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServerArgs::parse();

    // Configuration errors are reported through the subscriber, so the log
    // format falls back to the environment default when it cannot resolve.
    let config = args.resolve();
    let node_env = config
        .as_ref()
        .map_or(gatehouse_core::NodeEnv::Local, |c| c.node_env);
    if let Err(e) = telemetry::init(LogFormat::resolve(args.log_format, node_env)) {
        eprintln!("tracing init failed: {e}");
    }

    let config = match config {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        role = %config.role,
        env = %config.node_env,
        node_id = %config.node_id,
        "gatehouse starting"
    );

    match run(config, shutdown_signal()).await {
        Ok(()) => {
            info!("gatehouse stopped");
            ExitCode::SUCCESS
        }
        Err(e) if e.is_startup() => {
            error!(error = %e, "fatal startup error");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "server stopped with an error");
            ExitCode::FAILURE
        }
    }
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}
