use errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RedisConfig {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: u16,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub pool_size: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PostgresConfig {
    pub database_host: String,
    pub database_port: u16,
    pub database_user: String,
    pub database_password: String,
    pub database_name: String,
    pub database_schema: String,
}

/// Task lifecycle timings. The lease TTL drives everything else: the task
/// hash lives 3x the lease, the collapse sentinel 2x, and the watchdog
/// reclaims below half of it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskConfig {
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_lease_ttl() -> u64 {
    120
}

fn default_wait_timeout() -> u64 {
    90
}

fn default_cache_ttl() -> u64 {
    7 * 24 * 3600
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            lease_ttl_secs: default_lease_ttl(),
            wait_timeout_secs: default_wait_timeout(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpstreamConfig {
    /// Metadata API endpoint used to estimate GP cost.
    pub api_url: String,
    pub cookie: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthConfig {
    /// Base64-encoded Ed25519 public key used to verify node signatures.
    pub node_verify_key: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CheckinConfig {
    pub min_gp: i64,
    pub max_gp: i64,
}

impl Default for CheckinConfig {
    fn default() -> Self {
        CheckinConfig {
            min_gp: 10_000,
            max_gp: 20_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LogConfig {
    pub level: Option<String>,
    /// When set, logs are also written to rolling files in this directory.
    pub dir: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub name: String,
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub db: PostgresConfig,
    #[serde(default)]
    pub task: TaskConfig,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub checkin: CheckinConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(Box::new(e)))?;
        let config: Config =
            toml::from_str(&config_str).map_err(|e| ConfigError::ParseFailed(Box::new(e)))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config_with_defaults() {
        let raw = r#"
            name = "archon"

            [server]
            bind_addr = "0.0.0.0:8080"

            [redis]
            redis_host = "localhost"
            redis_port = 6379
            redis_db = 0

            [db]
            database_host = "localhost"
            database_port = 5432
            database_user = "postgres"
            database_password = "postgres"
            database_name = "archon"
            database_schema = "base"

            [upstream]
            api_url = "https://example.org/api.php"

            [auth]
            node_verify_key = "AAAA"
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.name, "archon");
        assert_eq!(config.task.lease_ttl_secs, 120);
        assert_eq!(config.task.wait_timeout_secs, 90);
        assert_eq!(config.task.cache_ttl_secs, 604_800);
        assert_eq!(config.checkin.min_gp, 10_000);
        assert!(config.redis.redis_username.is_none());
        assert!(config.upstream.cookie.is_none());
    }

    #[test]
    fn explicit_task_section_overrides_defaults() {
        let raw = r#"
            name = "archon"

            [server]
            bind_addr = "0.0.0.0:8080"

            [redis]
            redis_host = "localhost"
            redis_port = 6379
            redis_db = 0

            [db]
            database_host = "localhost"
            database_port = 5432
            database_user = "postgres"
            database_password = "postgres"
            database_name = "archon"
            database_schema = "base"

            [task]
            lease_ttl_secs = 60
            wait_timeout_secs = 30
            cache_ttl_secs = 3600

            [upstream]
            api_url = "https://example.org/api.php"

            [auth]
            node_verify_key = "AAAA"
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.task.lease_ttl_secs, 60);
        assert_eq!(config.task.wait_timeout_secs, 30);
        assert_eq!(config.task.cache_ttl_secs, 3600);
    }
}
