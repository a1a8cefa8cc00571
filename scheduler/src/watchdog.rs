use crate::Scheduler;
use log::{error, info, warn};
use metrics::gauge;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};

const TICK: Duration = Duration::from_secs(30);
const SCAN_LIMIT: isize = 100;

/// Lease watchdog.
///
/// Walks a bounded prefix of the pending queue every tick. Entries whose
/// task hash expired are dropped from the queue; PROCESSING tasks whose
/// remaining TTL fell below half the lease are reclaimed back to PENDING.
/// The fetch script refreshed the TTL to the full lease, so remaining TTL
/// is a proxy for time since the node's last sign of life.
pub async fn run_lease_watchdog(sched: Arc<Scheduler>, mut shutdown: broadcast::Receiver<()>) {
    info!("[scheduler] lease watchdog started");
    let mut ticker = interval(TICK);
    // The first tick completes immediately; consume it so passes are
    // spaced a full period apart.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = reclaim_expired_tasks(&sched).await {
                    error!("[scheduler] watchdog pass failed: {e}");
                }
            }
            _ = shutdown.recv() => {
                info!("[scheduler] lease watchdog stopped");
                return;
            }
        }
    }
}

async fn reclaim_expired_tasks(sched: &Scheduler) -> errors::Result<()> {
    let queue_len = sched.pending_queue_len().await?;
    gauge!("pending_queue_len").set(queue_len as f64);
    if queue_len == 0 {
        return Ok(());
    }

    let reclaim_threshold = (sched.lease_ttl_secs() / 2) as i64;

    for trace_id in sched.pending_queue_prefix(SCAN_LIMIT).await? {
        let (ttl, status, user_id, gallery_id) = match sched.task_lease_view(&trace_id).await {
            Ok(view) => view,
            Err(e) => {
                warn!("[scheduler] lease view for {trace_id} failed: {e}");
                continue;
            }
        };

        let status = match status {
            Some(s) => s,
            None => {
                // Hash expired entirely; the queue entry is garbage.
                sched.remove_queue_entry(&trace_id).await?;
                info!("[scheduler] removed expired task {trace_id} from queue");
                continue;
            }
        };

        if status != "PROCESSING" || ttl <= 0 || ttl >= reclaim_threshold {
            continue;
        }

        let (user_id, gallery_id) = match (user_id, gallery_id) {
            (Some(u), Some(g)) => (u, g),
            _ => continue,
        };

        match sched.reclaim_task(&trace_id, &user_id, &gallery_id).await {
            Ok(true) => {
                info!("[scheduler] reclaimed stuck task {trace_id} (TTL was {ttl}s)")
            }
            Ok(false) => {}
            Err(e) => error!("[scheduler] reclaim task {trace_id} error: {e}"),
        }
    }

    Ok(())
}
