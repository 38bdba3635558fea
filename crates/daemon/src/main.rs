// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `berthd` — the berth daemon.
//!
//! Exit codes: 0 clean shutdown, 1 fatal startup error, 2 configuration
//! error.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use berth_daemon::http;
use berth_daemon::lifecycle::{self, Config};

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("berthd: {e}");
            return ExitCode::from(2);
        }
    };

    let _log_guard = init_tracing(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to build runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(&config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(config: &Config) -> Result<(), lifecycle::LifecycleError> {
    let result = lifecycle::startup(config).await?;
    let state = result.state.clone();
    let app = http::router(result.state);

    info!(
        addr = %format!("{}:{}", config.bind, config.port),
        mode = ?config.mode,
        "listening"
    );

    let server = axum::serve(result.listener, app).with_graceful_shutdown(shutdown_signal());
    let outcome = server.await;

    // Cascade: stop agent clients cooperatively before releasing the lock.
    let sessions = state.store.list_workspaces().await.ok().unwrap_or_default();
    for workspace in sessions {
        if let Ok(list) = state.store.list_sessions(&workspace.id).await {
            for session in list {
                state.manager.stop_session_clients(&session.id).await;
            }
        }
    }
    drop(result.lock_file);

    outcome.map_err(lifecycle::LifecycleError::Io)?;
    info!("clean shutdown");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            return std::future::pending().await;
        }
    };
    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
    }
}

/// Console + rolling file logging; the guard must outlive main.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let logs_dir = config.state_dir.join("logs");
    if std::fs::create_dir_all(&logs_dir).is_err() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return None;
    }
    let appender = tracing_appender::rolling::daily(logs_dir, "berthd.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer.and(std::io::stderr))
        .init();
    Some(guard)
}
