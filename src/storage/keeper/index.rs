//! 内存与文件 keeper 共用的唯一性索引

use std::collections::HashMap;

use crate::errors::{Result, TinyurlError};
use crate::storage::models::{
    BatchReport, DeletionRequest, Inserted, UrlMap, UrlRecord, UserMap, UserRecord,
    key_from_short_url, sorted_entries,
};

use super::hash_matches;

#[derive(Default, Clone)]
pub(crate) struct LinkIndex {
    by_key: UrlMap,
    /// original_url -> 短码
    key_by_url: HashMap<String, String>,
}

impl LinkIndex {
    pub fn from_map(map: UrlMap) -> Self {
        let mut index = Self::default();
        for (key, record) in map {
            index.key_by_url.insert(record.original_url.clone(), key.clone());
            index.by_key.insert(key, record);
        }
        index
    }

    pub fn snapshot(&self) -> UrlMap {
        self.by_key.clone()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &UrlRecord> {
        self.by_key.values()
    }

    /// 已占用该原始 URL 或该短码的记录
    fn existing(&self, key: &str, original_url: &str) -> Option<&UrlRecord> {
        self.key_by_url
            .get(original_url)
            .and_then(|k| self.by_key.get(k))
            .or_else(|| self.by_key.get(key))
    }

    /// 记录按自身短码入索引，`key` 只在记录缺少短码时补上
    pub fn insert(&mut self, key: &str, mut record: UrlRecord) -> Inserted<UrlRecord> {
        if record.short_key.is_empty() {
            record.short_key = key.to_string();
        }
        let key = record.key();
        if let Some(existing) = self.existing(&key, &record.original_url) {
            return Inserted::Existing(existing.clone());
        }

        record.ensure_id();
        self.key_by_url.insert(record.original_url.clone(), key.clone());
        self.by_key.insert(key, record.clone());
        Inserted::Created(record)
    }

    /// 撤销一次新增（写盘失败时使用）
    pub fn remove(&mut self, record: &UrlRecord) {
        let key = record.key();
        if self.by_key.get(&key).is_some_and(|r| r.id == record.id) {
            self.by_key.remove(&key);
            self.key_by_url.remove(&record.original_url);
        }
    }

    /// 批量写入，返回报告和实际新增的记录
    pub fn insert_batch(&mut self, batch: &UrlMap) -> (BatchReport, Vec<UrlRecord>) {
        let mut report = BatchReport::default();
        let mut created = Vec::new();

        for (key, record) in sorted_entries(batch) {
            match self.insert(key, record.clone()) {
                Inserted::Created(r) => {
                    report.inserted += 1;
                    created.push(r);
                }
                Inserted::Existing(existing) => report.skipped.push((key.clone(), existing)),
            }
        }

        (report, created)
    }

    /// 设置删除标记，返回是否有记录发生变化
    pub fn tombstone(&mut self, requests: &[DeletionRequest]) -> bool {
        let mut changed = false;
        for request in requests {
            for (owner, key) in request.pairs() {
                let key = key_from_short_url(key);
                if let Some(record) = self.by_key.get_mut(&key)
                    && record.is_owned_by(owner)
                    && record.key() == key
                    && !record.deleted
                {
                    record.deleted = true;
                    changed = true;
                }
            }
        }
        changed
    }
}

#[derive(Default)]
pub(crate) struct UserIndex {
    by_email: UserMap,
}

impl UserIndex {
    pub fn from_map(map: UserMap) -> Self {
        Self { by_email: map }
    }

    pub fn snapshot(&self) -> UserMap {
        self.by_email.clone()
    }

    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    pub fn insert(&mut self, key: &str, mut record: UserRecord) -> Result<Inserted<UserRecord>> {
        if record.email.is_empty() {
            record.email = key.to_string();
        }
        let email = record.email.clone();
        if let Some(existing) = self.by_email.get(&email) {
            if !record.password_hash.is_empty()
                && !hash_matches(&existing.password_hash, &record.password_hash)
            {
                return Err(TinyurlError::credential_mismatch(format!(
                    "credential mismatch for user {}",
                    email
                )));
            }
            return Ok(Inserted::Existing(existing.clone()));
        }

        record.ensure_id();
        self.by_email.insert(email, record.clone());
        Ok(Inserted::Created(record))
    }

    pub fn remove(&mut self, email: &str) {
        self.by_email.remove(email);
    }
}
