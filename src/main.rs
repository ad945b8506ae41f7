use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use slotbook::auth::AdminAuth;
use slotbook::clock::SystemClock;
use slotbook::config::Config;
use slotbook::engine::{CsvStore, Engine};
use slotbook::http::{self, AppState};
use slotbook::notify::LogNotifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    slotbook::observability::init(config.metrics_port)?;

    let store = Arc::new(CsvStore::open(&config.data_file)?);
    let engine = Arc::new(Engine::new(
        store,
        config.policy,
        Arc::new(SystemClock),
        config.hide_past_slots,
    ));
    let state = AppState {
        engine,
        notifier: Arc::new(LogNotifier),
        admin: AdminAuth::new(config.admin_password.clone()),
        bcc: Arc::new(config.bcc.clone()),
    };

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("slotbook listening on {addr}");
    info!("  data_file: {}", config.data_file.display());
    info!("  time_zone: {}", config.policy.time_zone.name());
    info!(
        "  hours: {:02}:00-{:02}:00, break {:02}:00-{:02}:00, every {} min",
        config.policy.open_hour,
        config.policy.close_hour,
        config.policy.break_start,
        config.policy.break_end,
        config.policy.interval_minutes
    );
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("slotbook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM. In-flight requests are drained by axum.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
    info!("shutdown signal received, draining requests");
}
