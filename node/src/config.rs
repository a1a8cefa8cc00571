use common::config::LogConfig;
use errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProviderConfig {
    /// Archive-URL generation endpoint.
    pub archive_url: String,
    /// Balance / free-quota status endpoint.
    pub status_url: String,
    pub cookie: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    /// Base64 Ed25519 signature over the node id, issued offline.
    pub signature: String,
    /// WebSocket attach point, e.g. `ws://server:8080/ws`.
    pub server_url: String,
    #[serde(default = "default_base_balance")]
    pub base_balance_gp: i64,
    #[serde(default = "default_base_claim_delay")]
    pub base_claim_delay_secs: u64,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_base_balance() -> i64 {
    50_000
}

fn default_base_claim_delay() -> u64 {
    10
}

impl NodeConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(Box::new(e)))?;
        let config: NodeConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed(Box::new(e)))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_delay_defaults() {
        let raw = r#"
            node_id = "node-1"
            signature = "c2ln"
            server_url = "ws://localhost:8080/ws"

            [provider]
            archive_url = "https://upstream.example/archive"
            status_url = "https://upstream.example/status"
        "#;

        let config: NodeConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.base_balance_gp, 50_000);
        assert_eq!(config.base_claim_delay_secs, 10);
        assert!(config.provider.cookie.is_none());
    }
}
