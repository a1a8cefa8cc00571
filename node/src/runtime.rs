use crate::client::{MessageHandler, WsClient};
use crate::config::NodeConfig;
use crate::policy::ClaimPolicy;
use crate::provider::ArchiveProvider;
use async_trait::async_trait;
use common::model::{TaskAnnouncement, TaskAssignment, TaskResult};
use errors::Result;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::interval;

const TASK_QUEUE_SIZE: usize = 100;
const WORKER_COUNT: usize = 5;
const STATUS_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DAILY_RESET_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// The worker runtime: listens for announcements, races to claim the ones
/// the policy accepts, and runs assignments through a fixed-size pool.
pub struct NodeRuntime {
    client: Arc<WsClient>,
    provider: Arc<dyn ArchiveProvider>,
    policy: ClaimPolicy,
    task_tx: mpsc::Sender<TaskAssignment>,
    task_rx: Arc<Mutex<mpsc::Receiver<TaskAssignment>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl NodeRuntime {
    pub fn new(config: &NodeConfig, provider: Arc<dyn ArchiveProvider>) -> Arc<Self> {
        let client = Arc::new(WsClient::new(
            &config.server_url,
            &config.node_id,
            &config.signature,
        ));
        let (task_tx, task_rx) = mpsc::channel(TASK_QUEUE_SIZE);
        let (shutdown_tx, _) = broadcast::channel(1);

        let runtime = Arc::new(NodeRuntime {
            client: client.clone(),
            provider,
            policy: ClaimPolicy::new(
                config.base_balance_gp,
                Duration::from_secs(config.base_claim_delay_secs),
            ),
            task_tx,
            task_rx: Arc::new(Mutex::new(task_rx)),
            shutdown_tx,
        });

        let handler: Arc<dyn MessageHandler> = runtime.clone();
        client.set_handler(handler);
        runtime
    }

    /// Connects and spawns the worker pool plus the background refresh
    /// loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.provider.refresh_status().await {
            warn!("[node] initial status refresh failed: {e}");
        }

        self.client.connect().await?;

        for _ in 0..WORKER_COUNT {
            let runtime = self.clone();
            let shutdown = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                runtime.task_processor(shutdown).await;
            });
        }

        let refresh_runtime = self.clone();
        let refresh_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            refresh_runtime
                .status_refresh_loop(refresh_shutdown)
                .await;
        });

        let reset_runtime = self.clone();
        let reset_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            reset_runtime.daily_reset_loop(reset_shutdown).await;
        });

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        self.client.close();
    }

    /// Forces a redial, cancelling any backoff in progress.
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        self.client.reconnect().await
    }

    async fn task_processor(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let task = tokio::select! {
                _ = shutdown.recv() => return,
                task = async {
                    let mut rx = self.task_rx.lock().await;
                    rx.recv().await
                } => task,
            };

            match task {
                Some(task) => self.process_task(task).await,
                None => return,
            }
        }
    }

    async fn process_task(&self, task: TaskAssignment) {
        info!(
            "[node] processing task {} (gallery={})",
            task.trace_id, task.gallery_id
        );

        let result = match self
            .provider
            .generate_archive_url(&task.gallery_id, &task.gallery_key)
            .await
        {
            Ok(outcome) => {
                info!(
                    "[node] task {} completed: archive_url={}, actual_gp={}, size={:.1}MiB",
                    task.trace_id, outcome.archive_url, outcome.actual_gp, outcome.size_mib
                );
                TaskResult {
                    trace_id: task.trace_id.clone(),
                    node_id: String::new(),
                    success: true,
                    actual_gp: outcome.actual_gp,
                    archive_url: Some(outcome.archive_url),
                    error: None,
                }
            }
            Err(e) => {
                warn!("[node] task {} failed: {e}", task.trace_id);
                TaskResult {
                    trace_id: task.trace_id.clone(),
                    node_id: String::new(),
                    success: false,
                    actual_gp: 0,
                    archive_url: None,
                    error: Some(e.to_string()),
                }
            }
        };

        if let Err(e) = self.client.send_task_result(result) {
            warn!("[node] failed to send task result: {e}");
        }

        if let Err(e) = self.provider.refresh_status().await {
            warn!("[node] status refresh after task failed: {e}");
        }
    }

    async fn status_refresh_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(STATUS_REFRESH_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {
                    match self.provider.refresh_status().await {
                        Ok(()) => {
                            let quota = self.provider.quota_status();
                            info!(
                                "[node] status refreshed: have_free_quota={}, gp_balance={}, today_cost={}",
                                quota.have_free_quota,
                                quota.gp_balance,
                                self.provider.today_gp_cost()
                            );
                        }
                        Err(e) => warn!("[node] status refresh failed: {e}"),
                    }
                }
            }
        }
    }

    async fn daily_reset_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(DAILY_RESET_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {
                    self.provider.reset_daily_cost();
                    info!("[node] daily GP cost reset");
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for NodeRuntime {
    async fn on_task_announcement(&self, ann: TaskAnnouncement) {
        info!(
            "[node] received task announcement: trace={}, free_tier={}, estimated_gp={}",
            ann.trace_id, ann.free_tier, ann.estimated_gp
        );

        let quota = self.provider.quota_status();
        let delay = match self
            .policy
            .decide(&ann, quota.have_free_quota, quota.gp_balance)
        {
            Some(delay) => delay,
            None => {
                info!("[node] skipping task {} (insufficient balance)", ann.trace_id);
                return;
            }
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            if delay > Duration::ZERO {
                info!(
                    "[node] waiting {delay:?} before claiming task {}",
                    ann.trace_id
                );
                tokio::time::sleep(delay).await;
            }

            info!("[node] attempting to claim task {}", ann.trace_id);
            if let Err(e) = client.send_fetch_task(&ann.trace_id) {
                warn!("[node] failed to send fetch task: {e}");
            }
        });
    }

    async fn on_task_assigned(&self, task: TaskAssignment) {
        info!(
            "[node] task assigned: trace={}, gallery={}",
            task.trace_id, task.gallery_id
        );

        if self.task_tx.try_send(task).is_err() {
            warn!("[node] task queue full, dropping task");
        }
    }

    async fn on_task_gone(&self, trace_id: String) {
        info!("[node] task gone: trace={trace_id}");
    }

    fn on_connected(&self) {
        info!("[node] connected to server");
    }

    fn on_disconnected(&self) {
        info!("[node] disconnected from server");
    }
}
