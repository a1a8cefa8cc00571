use node::{NodeConfig, NodeRuntime, UpstreamProvider};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "node.toml".to_string());
    let config = NodeConfig::load(&config_path).expect("failed to load config");
    let _log_guard = utils::logger::init("archon-node", &config.log);

    let provider = Arc::new(UpstreamProvider::new(&config.provider));
    let runtime = NodeRuntime::new(&config, provider);

    runtime.start().await.expect("failed to start node");
    log::info!("archon-node {} started", config.node_id);

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    log::info!("shutting down");
    runtime.stop();
}
