//! 持久化适配器（keeper）
//!
//! 引擎只面向 [`Keeper`] 能力集编程，具体后端在启动时由 [`KeeperFactory`]
//! 根据配置选定一次：
//! - `memory`：无持久化，仅维护唯一性索引
//! - `file`：JSON 行文件
//! - `database`：SeaORM（SQLite / MySQL / PostgreSQL）

pub mod database;
pub mod file;
mod index;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{KeeperKind, StorageConfig};
use crate::errors::Result;
use crate::storage::models::{
    BatchReport, DeletionRequest, Inserted, UrlMap, UrlRecord, UserMap, UserRecord,
};

pub use database::DatabaseKeeper;
pub use file::FileKeeper;
pub use memory::MemoryKeeper;

#[async_trait]
pub trait Keeper: Send + Sync {
    /// 启动时读取全部链接，键为短码
    async fn load(&self) -> Result<UrlMap>;

    /// 启动时读取全部用户，键为邮箱
    async fn load_users(&self) -> Result<UserMap>;

    /// 按原始 URL 唯一写入；已存在时返回 `Inserted::Existing(已有记录)`
    async fn save(&self, key: &str, record: UrlRecord) -> Result<Inserted<UrlRecord>>;

    /// 按邮箱唯一写入。
    ///
    /// 记录带有 `password_hash` 且邮箱已存在时，还会比对已存的哈希，
    /// 不一致返回 `CredentialMismatch`。
    async fn save_user(&self, key: &str, record: UserRecord) -> Result<Inserted<UserRecord>>;

    /// 批量写入，违反唯一约束的条目被跳过（先持久化者为准）
    async fn save_batch(&self, batch: &UrlMap) -> Result<BatchReport>;

    /// 为所有 (owner, 短码) 对设置删除标记
    async fn update_batch(&self, requests: &[DeletionRequest]) -> Result<()>;

    async fn count_urls(&self) -> Result<usize>;

    async fn count_users(&self) -> Result<usize>;

    /// 后端是否可用（尽力而为，不返回错误）
    async fn ping(&self) -> bool;

    /// 释放资源（尽力而为，不返回错误）
    async fn close(&self) -> bool;

    fn backend_name(&self) -> &'static str;
}

/// 比较已存与请求中的密码哈希（常数时间）
pub(crate) fn hash_matches(stored: &str, supplied: &str) -> bool {
    use subtle::ConstantTimeEq;
    stored.as_bytes().ct_eq(supplied.as_bytes()).into()
}

/// 按配置创建 keeper
pub struct KeeperFactory;

impl KeeperFactory {
    pub async fn create(config: &StorageConfig) -> Result<Arc<dyn Keeper>> {
        let kind = config.resolved_backend();

        let keeper: Arc<dyn Keeper> = match kind {
            KeeperKind::Database => Arc::new(DatabaseKeeper::from_config(config).await?),
            KeeperKind::File => Arc::new(FileKeeper::open(&config.file_path, config.users_file()).await?),
            KeeperKind::Memory | KeeperKind::Auto => Arc::new(MemoryKeeper::new()),
        };

        info!("Using keeper backend: {}", keeper.backend_name());
        Ok(keeper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_matches() {
        assert!(hash_matches("abc", "abc"));
        assert!(!hash_matches("abc", "abd"));
        assert!(!hash_matches("abc", "ab"));
    }

    #[tokio::test]
    async fn test_factory_memory_by_default() {
        let keeper = KeeperFactory::create(&StorageConfig::default()).await.unwrap();
        assert_eq!(keeper.backend_name(), "memory");
        assert!(!keeper.ping().await);
    }

    #[tokio::test]
    async fn test_factory_file_when_path_set() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig {
            file_path: dir.path().join("links.jsonl").display().to_string(),
            ..Default::default()
        };

        let keeper = KeeperFactory::create(&config).await.unwrap();
        assert_eq!(keeper.backend_name(), "file");
        assert!(keeper.ping().await);
    }

    #[tokio::test]
    async fn test_factory_database_when_url_set() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig {
            database_url: format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display()),
            ..Default::default()
        };

        let keeper = KeeperFactory::create(&config).await.unwrap();
        assert_eq!(keeper.backend_name(), "sqlite");
        assert!(keeper.ping().await);
    }
}
