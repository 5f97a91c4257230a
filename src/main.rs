use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slotbook::catalog::DemoCatalog;
use slotbook::clock::SystemClock;
use slotbook::config::Config;
use slotbook::engine::{Collaborators, Engine};
use slotbook::notify::{self, LogSink, NotifyHub, Outbox};
use slotbook::server;
use slotbook::snapshot::{FileSnapshotStore, SnapshotStore};
use slotbook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    slotbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(config.snapshot_path()));

    let (outbox, outbox_rx) = Outbox::channel();
    let outbox_task = tokio::spawn(notify::run_outbox(outbox_rx, LogSink));
    let collab = Collaborators {
        catalog: Arc::new(DemoCatalog),
        clock: Arc::new(SystemClock),
        outbox,
        notify: Arc::new(NotifyHub::new()),
    };

    let engine = match store.load()? {
        Some(snapshot) => Engine::restore(config.engine.clone(), collab, snapshot)?,
        None => Engine::new(config.engine.clone(), collab)?,
    };
    let engine = Arc::new(engine);

    let sweeper = sweeper::spawn_sweeper(engine.clone());
    let snapshotter =
        sweeper::spawn_snapshotter(engine.clone(), store.clone(), config.snapshot_interval);

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("slotbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!(
        "  grid: {} slots of {} min, hold ttl {:?}, sweep every {:?}",
        engine.grid().slot_count(),
        engine.grid().slot_minutes(),
        config.engine.hold_ttl,
        config.engine.sweep_interval
    );
    info!("  companies: {}", engine.companies().len());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
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
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(slotbook::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(slotbook::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(slotbook::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = server::process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(slotbook::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    sweeper.shutdown().await;
    snapshotter.shutdown().await;
    match engine.save_to(store).await {
        Ok(saved) => info!("final snapshot {}", if saved { "written" } else { "unchanged" }),
        Err(e) => tracing::error!("final snapshot failed: {e}"),
    }

    // Dropping the engine closes the outbox; let the sink flush what is queued
    drop(engine);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), outbox_task).await;

    info!("slotbook stopped");
    Ok(())
}
