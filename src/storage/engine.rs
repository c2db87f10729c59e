//! 存储引擎
//!
//! 读请求只访问内存中的两张表；写请求先交给 keeper 持久化，再更新内存。
//! 链接表与用户表各有一把读写锁，互不阻塞。锁只在内存更新时持有，
//! 不跨越 keeper 的 await。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::keeper::Keeper;
use super::models::{
    BatchReport, DeletionRequest, Inserted, UrlMap, UrlRecord, UserMap, UserRecord,
    key_from_short_url,
};
use crate::errors::{Result, TinyurlError};
use crate::worker::DeletionSink;

pub struct Storage {
    urls: RwLock<UrlMap>,
    users: RwLock<UserMap>,
    keeper: Arc<dyn Keeper>,
}

impl Storage {
    /// 创建引擎并从 keeper 载入快照
    ///
    /// 载入失败不会阻止启动，对应的表从空开始。
    pub async fn open(keeper: Arc<dyn Keeper>) -> Self {
        let urls = keeper.load().await.unwrap_or_else(|e| {
            warn!("Failed to load links from {}: {}", keeper.backend_name(), e);
            UrlMap::new()
        });
        let users = keeper.load_users().await.unwrap_or_else(|e| {
            warn!("Failed to load users from {}: {}", keeper.backend_name(), e);
            UserMap::new()
        });

        info!(
            "Storage opened on {} keeper: {} links, {} users",
            keeper.backend_name(),
            urls.len(),
            users.len()
        );

        Self {
            urls: RwLock::new(urls),
            users: RwLock::new(users),
            keeper,
        }
    }

    pub fn keeper(&self) -> &Arc<dyn Keeper> {
        &self.keeper
    }

    /// 新增链接
    ///
    /// 原始 URL 已存在时返回 `Inserted::Existing`，携带已有记录，
    /// 内存表也以该记录为准。持久化失败时内存表不变。
    pub async fn insert_url(&self, key: &str, record: UrlRecord) -> Result<Inserted<UrlRecord>> {
        let inserted = self.keeper.save(key, record).await?;

        let stored = inserted.record();
        self.urls.write().insert(stored.key(), stored.clone());

        if inserted.is_conflict() {
            debug!(
                "Link for {} already exists as {}",
                stored.original_url, stored.short_key
            );
        }
        Ok(inserted)
    }

    /// 新增用户，语义同 [`Storage::insert_url`]，以邮箱为唯一键
    pub async fn insert_user(&self, email: &str, record: UserRecord) -> Result<Inserted<UserRecord>> {
        let inserted = self.keeper.save_user(email, record).await?;

        let stored = inserted.record();
        self.users
            .write()
            .insert(stored.email.clone(), stored.clone());
        Ok(inserted)
    }

    /// 批量新增链接
    ///
    /// 先乐观地并入内存表，再交给 keeper；keeper 跳过的条目按其返回的
    /// 已有记录修正内存表。持久化失败时返回错误，但不回滚内存表。
    pub async fn insert_batch(&self, batch: UrlMap) -> Result<BatchReport> {
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        let batch = normalize_batch(batch);
        self.merge_optimistic(&batch);

        let report = match self.keeper.save_batch(&batch).await {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    "Batch of {} links kept in memory but not persisted: {}",
                    batch.len(),
                    e
                );
                return Err(e);
            }
        };

        if !report.is_complete() {
            let mut urls = self.urls.write();
            for (requested, existing) in &report.skipped {
                let existing_key = existing.key();
                // 只撤掉本批次乐观写入的那条
                let ours = batch
                    .get(requested)
                    .zip(urls.get(requested))
                    .is_some_and(|(mine, current)| mine.id == current.id);
                if *requested != existing_key && ours {
                    urls.remove(requested);
                }
                urls.insert(existing_key, existing.clone());
            }
            debug!("Reconciled {} skipped batch entries", report.skipped.len());
        }

        Ok(report)
    }

    /// 乐观合并：已占用的短码和已存在的原始 URL 不覆盖
    fn merge_optimistic(&self, batch: &UrlMap) {
        let mut urls = self.urls.write();
        let mut known: HashSet<String> = urls.values().map(|r| r.original_url.clone()).collect();

        for (key, record) in batch {
            if urls.contains_key(key) || !known.insert(record.original_url.clone()) {
                continue;
            }
            urls.insert(key.clone(), record.clone());
        }
    }

    pub fn get_url(&self, key: &str) -> Result<UrlRecord> {
        let key = key_from_short_url(key);
        self.urls
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| TinyurlError::not_found(format!("短链接不存在: {}", key)))
    }

    pub fn get_user(&self, email: &str) -> Result<UserRecord> {
        self.users
            .read()
            .get(email)
            .cloned()
            .ok_or_else(|| TinyurlError::not_found(format!("用户不存在: {}", email)))
    }

    /// 某用户的全部链接，包括已删除的，按短码排序
    pub fn get_user_urls(&self, owner_id: &str) -> Vec<UrlRecord> {
        let mut records: Vec<UrlRecord> = self
            .urls
            .read()
            .values()
            .filter(|r| r.is_owned_by(owner_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.short_key.cmp(&b.short_key));
        records
    }

    /// 设置删除标记
    ///
    /// keeper 成功后才改内存表。只有属主一致且存储的短码与请求的短码
    /// 对应时才会标记。
    pub async fn delete_urls(&self, requests: &[DeletionRequest]) -> Result<()> {
        if requests.iter().all(|r| r.short_keys.is_empty()) {
            return Ok(());
        }

        self.keeper.update_batch(requests).await?;

        let mut marked = 0usize;
        let mut urls = self.urls.write();
        for request in requests {
            for (owner, key) in request.pairs() {
                let key = key_from_short_url(key);
                if let Some(record) = urls.get_mut(&key)
                    && record.is_owned_by(owner)
                    && record.key() == key
                    && !record.deleted
                {
                    record.deleted = true;
                    marked += 1;
                }
            }
        }
        debug!("Marked {} links deleted in memory", marked);
        Ok(())
    }

    /// 持久化是否可用；纯内存模式恒为 false
    pub async fn ping(&self) -> bool {
        self.keeper.ping().await
    }

    pub async fn count_urls(&self) -> Result<usize> {
        self.keeper.count_urls().await
    }

    pub async fn count_users(&self) -> Result<usize> {
        self.keeper.count_users().await
    }

    pub async fn close(&self) -> bool {
        self.keeper.close().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.keeper.backend_name()
    }

    /// 内存表中的链接数
    pub fn len(&self) -> usize {
        self.urls.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.read().is_empty()
    }
}

#[async_trait]
impl DeletionSink for Storage {
    async fn apply_deletions(&self, requests: &[DeletionRequest]) -> Result<()> {
        self.delete_urls(requests).await
    }
}

/// 按记录自身的短码重新建键，并补齐短码和 ID
fn normalize_batch(batch: UrlMap) -> UrlMap {
    batch
        .into_iter()
        .map(|(key, mut record)| {
            if record.short_key.is_empty() {
                record.short_key = key;
            }
            record.ensure_id();
            (record.key(), record)
        })
        .collect()
}
