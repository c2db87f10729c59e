use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TinyurlError};

/// 短码 -> 链接记录
pub type UrlMap = HashMap<String, UrlRecord>;

/// 邮箱 -> 用户记录
pub type UserMap = HashMap<String, UserRecord>;

/// 一条短链接记录
///
/// 序列化字段名与 JSON 行文件 / `dataurl` 表的列名一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UrlRecord {
    /// 关联 ID，为空时由 keeper 生成
    #[serde(rename = "correlation_id", default)]
    pub id: String,
    /// 短码，或带短码路径的完整短链接
    #[serde(rename = "short_url")]
    pub short_key: String,
    pub original_url: String,
    /// 创建者，匿名链接为 None
    #[serde(rename = "user_id", default)]
    pub owner_id: Option<String>,
    /// 软删除标记
    #[serde(rename = "is_deleted", default)]
    pub deleted: bool,
}

impl UrlRecord {
    pub fn new(short_key: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            short_key: short_key.into(),
            original_url: original_url.into(),
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 记录在内存表中的键
    pub fn key(&self) -> String {
        key_from_short_url(&self.short_key)
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id.as_deref() == Some(owner_id)
    }

    /// 缺少 ID 时分配一个新的 UUID
    pub(crate) fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = new_id();
        }
    }
}

/// 一个用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserRecord {
    #[serde(default)]
    pub id: String,
    pub email: String,
    #[serde(rename = "hash", default)]
    pub password_hash: String,
    #[serde(rename = "name", default)]
    pub display_name: String,
}

impl UserRecord {
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password_hash: password_hash.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub(crate) fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = new_id();
        }
    }
}

/// 一个用户批量删除自己链接的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    #[serde(rename = "user_id")]
    pub owner_id: String,
    #[serde(rename = "short_url")]
    pub short_keys: Vec<String>,
}

impl DeletionRequest {
    pub fn new<I, S>(owner_id: impl Into<String>, short_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            owner_id: owner_id.into(),
            short_keys: short_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// 合并同一用户的另一个请求，跳过重复短码
    pub fn merge(&mut self, other: DeletionRequest) {
        for key in other.short_keys {
            if !self.short_keys.contains(&key) {
                self.short_keys.push(key);
            }
        }
    }

    /// 展开为 (owner, key) 对
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.short_keys
            .iter()
            .map(move |k| (self.owner_id.as_str(), k.as_str()))
    }
}

/// 插入结果：新建，或唯一键已存在时返回已有记录（冲突）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inserted<T> {
    Created(T),
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Inserted::Existing(_))
    }

    pub fn record(&self) -> &T {
        match self {
            Inserted::Created(v) | Inserted::Existing(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Inserted::Created(v) | Inserted::Existing(v) => v,
        }
    }

    /// 冲突映射为 [`TinyurlError::Conflict`]，给只关心错误的调用方使用
    pub fn into_result(self) -> Result<T> {
        match self {
            Inserted::Created(v) => Ok(v),
            Inserted::Existing(_) => Err(TinyurlError::conflict("record already exists")),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Inserted<U> {
        match self {
            Inserted::Created(v) => Inserted::Created(f(v)),
            Inserted::Existing(v) => Inserted::Existing(f(v)),
        }
    }
}

/// 批量写入结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub inserted: usize,
    /// 因唯一约束被跳过的条目：(请求的短码, 已持久化的记录)
    pub skipped: Vec<(String, UrlRecord)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// 从短码或完整短链接中取出短码
///
/// `http://localhost:8080/abc` 与 `/abc/` 都得到 `abc`。
pub fn key_from_short_url(short_url: &str) -> String {
    let path = match url::Url::parse(short_url) {
        Ok(parsed) if parsed.has_host() => parsed.path().to_string(),
        _ => short_url.to_string(),
    };
    path.trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// 生成新的关联 ID
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 批量写入的稳定处理顺序（同批次内重复的原始 URL 以先处理者为准）
pub(crate) fn sorted_entries(batch: &UrlMap) -> Vec<(&String, &UrlRecord)> {
    let mut entries: Vec<_> = batch.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}
