use crate::connection;
use crate::waiter::ResultWaiter;
use axum::extract::ws::WebSocket;
use common::model::{FetchTask, TaskAnnouncement, TaskGone, TaskResult, WireMessage};
use dashmap::DashMap;
use log::{error, info, warn};
use metrics::{counter, gauge};
use scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Broadcast capability consumed by the request pipeline. Split out so
/// tests can substitute an in-memory double for the real hub.
pub trait Announcer: Send + Sync {
    fn broadcast_announcement(&self, ann: &TaskAnnouncement);
    fn client_count(&self) -> usize;
}

/// Registry of connected worker nodes plus the inbound frame dispatcher.
///
/// Connections register an outbound sender; broadcasts serialize once and
/// enqueue without blocking. Inbound frames are routed to the scheduler
/// (fetch/complete) and the result waiter.
pub struct Hub {
    clients: DashMap<String, mpsc::Sender<String>>,
    sched: Arc<Scheduler>,
    waiter: Arc<ResultWaiter>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Hub {
    pub fn new(
        sched: Arc<Scheduler>,
        waiter: Arc<ResultWaiter>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Hub {
            clients: DashMap::new(),
            sched,
            waiter,
            shutdown_tx,
        }
    }

    /// Drives one upgraded, already-authenticated socket to completion.
    pub async fn serve(self: Arc<Self>, socket: WebSocket, node_id: String) {
        let shutdown = self.shutdown_tx.subscribe();
        connection::run_connection(self, socket, node_id, shutdown).await;
    }

    pub(crate) fn register(&self, node_id: &str, tx: mpsc::Sender<String>) {
        self.clients.insert(node_id.to_string(), tx);
        gauge!("hub_connected_nodes").set(self.clients.len() as f64);
        info!(
            "[hub] node {node_id} connected (total: {})",
            self.clients.len()
        );
    }

    /// Removes the node only if this connection still owns the slot, so a
    /// stale disconnect cannot evict a fresh reconnect.
    pub(crate) fn unregister(&self, node_id: &str, tx: &mpsc::Sender<String>) {
        self.clients
            .remove_if(node_id, |_, current| current.same_channel(tx));
        gauge!("hub_connected_nodes").set(self.clients.len() as f64);
        info!(
            "[hub] node {node_id} disconnected (total: {})",
            self.clients.len()
        );
    }

    pub(crate) async fn handle_frame(&self, node_id: &str, raw: &str) {
        let msg: WireMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("[hub] node {node_id}: invalid message: {e}");
                return;
            }
        };

        match msg {
            WireMessage::FetchTask(mut req) => {
                // A node cannot speak for another: the authenticated
                // identity always wins over the payload.
                req.node_id = node_id.to_string();
                counter!("hub_messages_total", "type" => "fetch_task").increment(1);
                self.handle_fetch(req).await;
            }
            WireMessage::TaskResult(mut result) => {
                result.node_id = node_id.to_string();
                counter!("hub_messages_total", "type" => "task_result").increment(1);
                self.handle_result(result).await;
            }
            other => {
                warn!(
                    "[hub] node {node_id}: unexpected message type {:?}",
                    std::mem::discriminant(&other)
                );
            }
        }
    }

    async fn handle_fetch(&self, req: FetchTask) {
        let reply = match self.sched.fetch_task(&req.trace_id, &req.node_id).await {
            Ok(Some(assignment)) => WireMessage::TaskAssigned(assignment),
            Ok(None) => WireMessage::TaskGone(TaskGone {
                trace_id: req.trace_id.clone(),
            }),
            Err(e) => {
                error!("[hub] fetch task error: {e}");
                return;
            }
        };

        self.send_to(&req.node_id, &reply);
    }

    async fn handle_result(&self, result: TaskResult) {
        info!(
            "[hub] received result for trace={} from node={} success={}",
            result.trace_id, result.node_id, result.success
        );

        if result.success {
            if let Some(url) = result.archive_url.as_deref().filter(|u| !u.is_empty()) {
                match self
                    .sched
                    .complete_task(&result.trace_id, &result.node_id, url, result.actual_gp)
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_node_mismatch() => {
                        // Stale completion from a reclaimed lease; the
                        // winning node's result is the one that counts.
                        warn!(
                            "[hub] dropped stale completion for trace={} from node={}",
                            result.trace_id, result.node_id
                        );
                    }
                    Err(e) => error!("[hub] complete task error: {e}"),
                }
            }
        }

        // Waiters learn the outcome either way; failures surface to the
        // blocked caller as the worker's error message.
        self.waiter.notify(&result.trace_id, &result);
    }

    fn send_to(&self, node_id: &str, msg: &WireMessage) {
        let data = match serde_json::to_string(msg) {
            Ok(data) => data,
            Err(e) => {
                error!("[hub] marshal response error: {e}");
                return;
            }
        };

        if let Some(tx) = self.clients.get(node_id) {
            if tx.try_send(data).is_err() {
                warn!("[hub] send buffer full for node {node_id}");
                counter!("hub_send_dropped_total").increment(1);
            }
        }
    }
}

impl Announcer for Hub {
    /// Serializes once and enqueues without blocking. A node with a full
    /// outbound queue misses this announcement but stays connected; the
    /// trace reappears in the next announcement after a reclaim.
    fn broadcast_announcement(&self, ann: &TaskAnnouncement) {
        let msg = WireMessage::TaskAnnouncement(ann.clone());
        let data = match serde_json::to_string(&msg) {
            Ok(data) => data,
            Err(e) => {
                error!("[hub] marshal announcement error: {e}");
                return;
            }
        };

        let mut reached = 0usize;
        for entry in self.clients.iter() {
            if entry.value().try_send(data.clone()).is_ok() {
                reached += 1;
            } else {
                warn!("[hub] send buffer full for node {}, dropping", entry.key());
                counter!("hub_broadcast_dropped_total").increment(1);
            }
        }
        info!(
            "[hub] broadcast TASK_ANNOUNCEMENT trace={} to {reached}/{} nodes",
            ann.trace_id,
            self.clients.len()
        );
    }

    fn client_count(&self) -> usize {
        self.clients.len()
    }
}
