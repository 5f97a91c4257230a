use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::observability::SNAPSHOTS_TOTAL;
use crate::snapshot::SnapshotStore;

/// Handle to a background task. Dropping it leaves the task running; call `shutdown`.
pub struct TaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Stop the task and wait for its current pass to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("background task ended abnormally: {e}");
        }
    }
}

/// Expire stale holds every `sweep_interval`.
pub fn spawn_sweeper(engine: Arc<Engine>) -> TaskHandle {
    let period = engine.config().sweep_interval;
    spawn_periodic(period, move || {
        let engine = engine.clone();
        async move {
            let report = engine.sweep_expired().await;
            if report.skipped > 0 {
                debug!("sweep skipped {} holds resolved concurrently", report.skipped);
            }
        }
    })
}

/// Save a snapshot every `period` when something changed since the last save.
pub fn spawn_snapshotter(
    engine: Arc<Engine>,
    store: Arc<dyn SnapshotStore>,
    period: Duration,
) -> TaskHandle {
    spawn_periodic(period, move || {
        let engine = engine.clone();
        let store = store.clone();
        async move {
            match engine.save_to(store).await {
                Ok(true) => {
                    metrics::counter!(SNAPSHOTS_TOTAL).increment(1);
                    debug!("snapshot saved");
                }
                Ok(false) => {}
                Err(e) => warn!("snapshot failed: {e}"),
            }
        }
    })
}

fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
        info!("background task stopped");
    });
    TaskHandle { cancel, join }
}
