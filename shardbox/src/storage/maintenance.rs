//! Background maintenance: idle shard eviction and shard compaction.
//!
//! Each concern gets one task. Tasks poll the cancellation token and stop
//! at the next iteration boundary; the actual file work runs on the
//! blocking pool so the runtime stays responsive.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::select;
use tokio::task::spawn_blocking;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::registry::Registry;

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Unload shards idle past the threshold, for tables with adaptive
/// loading on.
pub fn spawn_idle_sweeper(
    registry: Arc<Registry>,
    interval: Duration,
    idle_after: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(interval) => {
                    let registry = registry.clone();
                    let idle_after = idle_after.as_millis() as u64;
                    let result = spawn_blocking(move || {
                        let now = epoch_ms();
                        for table in registry.tables() {
                            table.sweep_idle(now, idle_after);
                        }
                    })
                    .await;

                    if let Err(err) = result {
                        warn!("idle sweeper crashed: {}", err);
                    }
                }
            }
        }
    });
}

/// Merge partially filled shards, for tables with auto-optimize on.
pub fn spawn_optimizer(
    registry: Arc<Registry>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(interval) => {
                    let registry = registry.clone();
                    let result = spawn_blocking(move || {
                        for table in registry.tables() {
                            if let Err(err) = table.optimize() {
                                warn!(
                                    table = %table.name(),
                                    "optimize failed: {}", err
                                );
                            }
                        }
                    })
                    .await;

                    if let Err(err) = result {
                        warn!("optimizer crashed: {}", err);
                    }
                }
            }
        }
    });
}

/// Persist every loaded shard, in parallel, one blocking task per table.
/// Used on shutdown; failures are logged as potential data loss and never
/// block teardown.
pub async fn persist_all(registry: &Arc<Registry>) {
    let tasks: Vec<_> = registry
        .tables()
        .into_iter()
        .map(|table| {
            spawn_blocking(move || {
                if let Err(err) = table.persist(true) {
                    warn!(
                        table = %table.name(),
                        "persist failed, data may be lost: {}", err
                    );
                }
            })
        })
        .collect();

    futures::future::join_all(tasks).await;
}
