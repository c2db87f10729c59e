//! 建立连接并把表结构迁移到最新

use std::str::FromStr;
use std::time::Duration;

use sea_orm::sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, SqlxSqliteConnector};
use tracing::{debug, info};

use crate::errors::{Result, TinyurlError};
use migration::{Migrator, MigratorTrait};

/// 连接池参数，来自 `storage.pool_size` / `storage.timeout`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub timeout: Duration,
}

impl PoolSettings {
    pub fn new(max_connections: u32, timeout_secs: u64) -> Self {
        Self {
            max_connections: max_connections.max(1),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    fn connect_options(&self, database_url: &str) -> ConnectOptions {
        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(self.max_connections)
            .min_connections(self.max_connections.min(2))
            .connect_timeout(self.timeout)
            .acquire_timeout(self.timeout)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(3600))
            .sqlx_logging(false);
        opt
    }
}

/// 按后端类型建立连接，然后执行迁移（幂等）
pub async fn open(
    database_url: &str,
    backend_name: &str,
    pool: PoolSettings,
) -> Result<DatabaseConnection> {
    let db = if backend_name == "sqlite" {
        open_sqlite(database_url, pool).await?
    } else {
        Database::connect(pool.connect_options(database_url))
            .await
            .map_err(|e| {
                TinyurlError::database_connection(format!(
                    "无法连接到 {} 数据库: {}",
                    backend_name.to_uppercase(),
                    e
                ))
            })?
    };
    debug!(
        "{} pool ready (max {} connections)",
        backend_name, pool.max_connections
    );

    Migrator::up(&db, None)
        .await
        .map_err(|e| TinyurlError::database_operation(format!("迁移失败: {}", e)))?;
    info!("{} schema is up to date", backend_name);

    Ok(db)
}

/// SQLite：不存在则建库，WAL 日志，忙等 5 秒
fn sqlite_options(database_url: &str) -> Result<SqliteConnectOptions> {
    let opt = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| TinyurlError::database_config(format!("SQLite URL 解析失败: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .pragma("temp_store", "memory");
    Ok(opt)
}

async fn open_sqlite(database_url: &str, pool: PoolSettings) -> Result<DatabaseConnection> {
    let sqlite_pool = SqlitePoolOptions::new()
        .max_connections(pool.max_connections)
        .acquire_timeout(pool.timeout)
        .connect_with(sqlite_options(database_url)?)
        .await
        .map_err(|e| {
            TinyurlError::database_connection(format!("无法连接到 SQLite 数据库: {}", e))
        })?;

    Ok(SqlxSqliteConnector::from_sqlx_sqlite_pool(sqlite_pool))
}
