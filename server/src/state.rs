use crate::service::GalleryService;
use crate::store::AuditStore;
use crate::users::UserService;
use common::Config;
use hub::{Hub, NodeAuthenticator, ResultWaiter};
use ledger::LedgerService;
use metrics_exporter_prometheus::PrometheusHandle;
use scheduler::Scheduler;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sched: Arc<Scheduler>,
    pub hub: Arc<Hub>,
    pub waiter: Arc<ResultWaiter>,
    pub ledger: Arc<LedgerService>,
    pub users: Arc<UserService>,
    pub store: Arc<AuditStore>,
    pub service: Arc<GalleryService>,
    pub authenticator: Arc<NodeAuthenticator>,
    pub prometheus: Option<PrometheusHandle>,
}
