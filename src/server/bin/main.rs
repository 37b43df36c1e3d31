use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::{error, info};
use warp::Filter;

use allotment::api::{self, AppState};
use allotment::config::Settings;
use allotment::db::TimesheetStore;
use allotment::telemetry::{self, get_subscriber, init_subscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;

    let subscriber = get_subscriber(
        telemetry::SERVICE_NAME,
        telemetry::env_filter(telemetry::DEFAULT_FILTER),
        std::io::stdout,
    );
    init_subscriber(subscriber)?;

    let store = TimesheetStore::connect(&settings.database_url, settings.max_connections)
        .context("Invalid DATABASE_URL")?;
    store
        .init_schema()
        .await
        .context("Failed to create the timesheets table")?;
    info!(user_id = %settings.user_id, strict = settings.strict_validation, "timesheet store ready");

    let state = AppState::new(store.clone(), settings.user_id.clone(), settings.strict_validation);
    let served = run(state, settings.addr).await;

    store.close().await;
    served
}

async fn run(state: AppState, addr: SocketAddr) -> Result<()> {
    let routes = api::routes(state).with(warp::trace::request());

    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, shutdown_signal())
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%bound, "listening");

    server.await;
    info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
