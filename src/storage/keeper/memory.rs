use async_trait::async_trait;
use parking_lot::Mutex;

use super::Keeper;
use super::index::{LinkIndex, UserIndex};
use crate::errors::Result;
use crate::storage::models::{
    BatchReport, DeletionRequest, Inserted, UrlMap, UrlRecord, UserMap, UserRecord,
};

/// 无持久化的 keeper
///
/// 进程重启后数据丢失，`ping` 恒为 false，表示服务在无持久化模式下运行。
/// 仍维护唯一性索引，冲突语义与其他后端一致。
#[derive(Default)]
pub struct MemoryKeeper {
    links: Mutex<LinkIndex>,
    users: Mutex<UserIndex>,
}

impl MemoryKeeper {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Keeper for MemoryKeeper {
    async fn load(&self) -> Result<UrlMap> {
        Ok(self.links.lock().snapshot())
    }

    async fn load_users(&self) -> Result<UserMap> {
        Ok(self.users.lock().snapshot())
    }

    async fn save(&self, key: &str, record: UrlRecord) -> Result<Inserted<UrlRecord>> {
        Ok(self.links.lock().insert(key, record))
    }

    async fn save_user(&self, key: &str, record: UserRecord) -> Result<Inserted<UserRecord>> {
        self.users.lock().insert(key, record)
    }

    async fn save_batch(&self, batch: &UrlMap) -> Result<BatchReport> {
        let (report, _) = self.links.lock().insert_batch(batch);
        Ok(report)
    }

    async fn update_batch(&self, requests: &[DeletionRequest]) -> Result<()> {
        self.links.lock().tombstone(requests);
        Ok(())
    }

    async fn count_urls(&self) -> Result<usize> {
        Ok(self.links.lock().len())
    }

    async fn count_users(&self) -> Result<usize> {
        Ok(self.users.lock().len())
    }

    async fn ping(&self) -> bool {
        false
    }

    async fn close(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
