use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use lib_spool::{
    ActiveSpool, ProxyGateway, SpoolmanClient, SpoolmanConfig, SpoolmanStream, UsageAccumulator,
};

mod spool_logic;
use spool_logic::{config, http, klippy, logger, state, store};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    logger::setup_logging(
        config.log_dir.as_deref().unwrap_or("./logs".as_ref()),
        config.log_level.as_deref().unwrap_or("info"),
    )?;

    let spoolman_config = SpoolmanConfig {
        server: config
            .spoolman_url
            .clone()
            .context("No Spoolman URL configured (--spoolman-url or SPOOL_SPOOLMAN_URL)")?,
        sync_rate: Duration::from_secs(config.sync_rate_seconds.unwrap_or(5)),
        reconnect_delay: Duration::from_secs(config.reconnect_delay_seconds.unwrap_or(2)),
        ..Default::default()
    };
    let urls = spoolman_config.resolve_urls()?;
    log::info!("Spoolman API base: {}", urls.http_base);

    // Wiring: every collaborator is constructed here and injected explicitly.
    let client = Arc::new(SpoolmanClient::new(&urls, &spoolman_config)?);
    let connected = Arc::new(AtomicBool::new(false));
    let accumulator = Arc::new(UsageAccumulator::new());
    let selection_store = Arc::new(store::JsonFileStore::new(
        config
            .state_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("./active_spool.json")),
    ));
    let (events_tx, _) = broadcast::channel(32);
    let active = Arc::new(ActiveSpool::new(
        Arc::clone(&client),
        Arc::clone(&accumulator),
        selection_store,
        events_tx.clone(),
        Arc::clone(&connected),
    ));
    active.load().await?;
    let stream = Arc::new(SpoolmanStream::new(
        &spoolman_config,
        urls.ws_url.clone(),
        Arc::clone(&client),
        Arc::clone(&active),
        Arc::clone(&connected),
    ));
    let gateway = Arc::new(ProxyGateway::new(Arc::clone(&client), Arc::clone(&connected)));

    let app_state = state::AppState {
        active: Arc::clone(&active),
        stream: Arc::clone(&stream),
        gateway,
        accumulator: Arc::clone(&accumulator),
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let sync_cancel = CancellationToken::new();

    stream.start().await;
    let sync_handle = active.spawn_sync_task(spoolman_config.sync_rate, sync_cancel.clone());

    let klippy_handle = tokio::spawn(klippy::run(
        config
            .klippy_url
            .clone()
            .unwrap_or_else(|| "ws://127.0.0.1:7810/websocket".to_string()),
        Arc::clone(&accumulator),
        shutdown_tx.subscribe(),
    ));

    let server_handle = tokio::spawn(http::run(
        config.port.unwrap_or(7125),
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Surface selection changes in the log, as the notification feed does.
    let mut events_rx = events_tx.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            log::info!("Notification: {:?}", event);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    sync_cancel.cancel();

    // Flush whatever usage is still pending while the connection is up.
    active.flush().await;
    stream.stop().await;

    // Wait for components to shut down
    let _ = sync_handle.await;
    let _ = tokio::try_join!(klippy_handle, server_handle);

    log::info!("Shutdown complete.");
    Ok(())
}
