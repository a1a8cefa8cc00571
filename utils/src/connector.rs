use common::config::{PostgresConfig, RedisConfig};
use sea_orm::{Database, DatabaseConnection};

pub fn create_redis_pool(config: &RedisConfig) -> Option<deadpool_redis::Pool> {
    let cfg = deadpool_redis::Config {
        connection: Some(deadpool_redis::ConnectionInfo {
            addr: deadpool_redis::ConnectionAddr::Tcp(
                config.redis_host.clone(),
                config.redis_port,
            ),
            redis: deadpool_redis::RedisConnectionInfo {
                db: config.redis_db as i64,
                username: config.redis_username.clone(),
                password: config.redis_password.clone(),
                protocol: deadpool_redis::ProtocolVersion::RESP3,
            },
        }),
        pool: Some(deadpool_redis::PoolConfig {
            max_size: config.pool_size.unwrap_or(100),
            ..Default::default()
        }),
        ..Default::default()
    };
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)).ok()
}

pub async fn postgres_connection(config: &PostgresConfig) -> Option<DatabaseConnection> {
    let pg_url = format!(
        "postgres://{}:{}@{}:{}/{}",
        config.database_user,
        config.database_password,
        config.database_host,
        config.database_port,
        config.database_name
    );

    let mut db_options = sea_orm::ConnectOptions::new(pg_url);
    db_options
        .set_schema_search_path(&config.database_schema)
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Trace);

    match Database::connect(db_options).await {
        Ok(db) => Some(db),
        Err(e) => {
            log::error!("Failed to connect to postgres database: {}", e);
            None
        }
    }
}
