use common::Config;
use hub::{Announcer, Hub, NodeAuthenticator, ResultWaiter};
use ledger::LedgerService;
use log::info;
use metrics_exporter_prometheus::PrometheusBuilder;
use scheduler::{run_lease_watchdog, Scheduler};
use server::api::router;
use server::resolver::Resolver;
use server::store::AuditStore;
use server::users::UserService;
use server::{AppState, GalleryService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path).expect("failed to load config");
    let _log_guard = utils::logger::init(&config.name, &config.log);

    let prometheus = PrometheusBuilder::new().install_recorder().ok();

    let redis_pool =
        utils::connector::create_redis_pool(&config.redis).expect("failed to create redis pool");
    {
        let mut conn = redis_pool
            .get()
            .await
            .expect("failed to get redis connection");
        let _pong: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .expect("failed to ping redis");
    }
    info!("redis pool connected successfully");

    let db = utils::connector::postgres_connection(&config.db)
        .await
        .expect("failed to connect to postgres");
    info!("postgres connected successfully");

    let (shutdown_tx, _) = broadcast::channel(1);

    let sched = Arc::new(Scheduler::new(
        redis_pool,
        config.task.lease_ttl_secs,
        config.task.cache_ttl_secs,
    ));
    let waiter = Arc::new(ResultWaiter::new());
    let hub = Arc::new(Hub::new(
        sched.clone(),
        waiter.clone(),
        shutdown_tx.clone(),
    ));
    let ledger = Arc::new(LedgerService::new(db.clone()));
    let users = Arc::new(UserService::new(db.clone()));
    let store = Arc::new(AuditStore::new(db));
    let resolver = Arc::new(Resolver::new(&config.upstream));
    let authenticator = Arc::new(
        NodeAuthenticator::new(&config.auth.node_verify_key).expect("invalid node verify key"),
    );

    let announcer: Arc<dyn Announcer> = hub.clone();
    let service = Arc::new(GalleryService::new(
        sched.clone(),
        announcer,
        waiter.clone(),
        ledger.clone(),
        store.clone(),
        resolver,
        Duration::from_secs(config.task.wait_timeout_secs),
    ));

    tokio::spawn(run_lease_watchdog(sched.clone(), shutdown_tx.subscribe()));

    let bind_addr = config.server.bind_addr.clone();
    let state = AppState {
        config: Arc::new(config),
        sched,
        hub,
        waiter,
        ledger,
        users,
        store,
        service,
        authenticator,
        prometheus,
    };

    let app = router::build(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind listener");
    info!("archon-server listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .expect("server error");
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
}
