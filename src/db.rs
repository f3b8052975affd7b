use crate::{config::AppConfig, migrator::Migrator};
use metrics::gauge;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub type DbPool = DatabaseConnection;

/// Pool tuning for the orders/catalog database
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Every connection to `sqlite::memory:` opens its own empty database
fn is_sqlite_memory(url: &str) -> bool {
    url.starts_with("sqlite::memory:") || url.contains("mode=memory")
}

pub async fn establish_connection(database_url: &str) -> Result<DbPool, DbErr> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };

    establish_connection_with_config(&config).await
}

pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, DbErr> {
    debug!(url = %config.url, max = config.max_connections, "configuring database pool");

    if is_sqlite_memory(&config.url) && config.max_connections > 1 {
        warn!(
            max_connections = config.max_connections,
            "in-memory SQLite with a multi-connection pool; connections will not share data"
        );
    }

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(false);

    gauge!("storefront_db.max_connections", config.max_connections as f64);

    let db_pool = Database::connect(opt).await?;
    info!(backend = ?db_pool.get_database_backend(), "database pool ready");

    Ok(db_pool)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Applies pending products/orders/order_items migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbErr> {
    let pending = Migrator::get_pending_migrations(pool).await?.len();
    if pending == 0 {
        debug!("schema is up to date");
        return Ok(());
    }

    let start = std::time::Instant::now();
    Migrator::up(pool, None).await.map_err(|e| {
        error!(error = %e, "migrations failed");
        e
    })?;
    info!(applied = pending, elapsed = ?start.elapsed(), "migrations applied");
    Ok(())
}

pub async fn check_connection(pool: &DbPool) -> Result<(), DbErr> {
    pool.ping().await
}
