//! SeaORM keeper
//!
//! 支持 SQLite、MySQL/MariaDB 和 PostgreSQL。唯一性由 `dataurl.original_url`、
//! `dataurl.short_url` 和 `users.email` 上的唯一索引保证。

mod connection;
mod converters;
pub mod retry;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    SqlErr, TransactionTrait,
};
use tracing::{debug, info, warn};

use migration::entities::{data_url, user};

use super::index::LinkIndex;
use super::{Keeper, hash_matches};
use crate::config::StorageConfig;
use crate::errors::{Result, TinyurlError};
use crate::storage::models::{
    BatchReport, DeletionRequest, Inserted, UrlMap, UrlRecord, UserMap, UserRecord,
    key_from_short_url,
};

pub use connection::PoolSettings;
pub use converters::{
    model_to_url_record, model_to_user_record, url_record_to_active_model,
    user_record_to_active_model,
};
pub use retry::{RetryConfig, Transient};

const PING_TIMEOUT: Duration = Duration::from_secs(1);
/// insert_many 每批行数，避开 SQLite 的参数个数上限
const INSERT_CHUNK: usize = 500;
/// 每个删除事务处理的 (owner, 短码) 对数
const UPDATE_CHUNK: usize = 200;

const URLS_COUNT_KEY: &str = "urls";
const USERS_COUNT_KEY: &str = "users";

/// 从数据库 URL 推断数据库类型
pub fn infer_backend_from_url(database_url: &str) -> Result<&'static str> {
    if database_url.starts_with("sqlite:")
        || database_url.ends_with(".db")
        || database_url.ends_with(".sqlite")
    {
        Ok("sqlite")
    } else if database_url.starts_with("mysql://") || database_url.starts_with("mariadb://") {
        Ok("mysql")
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Ok("postgres")
    } else {
        Err(TinyurlError::database_config(format!(
            "无法从 URL 推断数据库类型: {}. 支持的 URL 格式: sqlite://, mysql://, mariadb://, postgres://",
            database_url
        )))
    }
}

/// 连接类故障归为 DatabaseConnection，其余归为 DatabaseOperation
fn db_error(context: &str, err: DbErr) -> TinyurlError {
    match Transient::of(&err) {
        Some(Transient::Connection) => {
            TinyurlError::database_connection(format!("{}: {}", context, err))
        }
        _ => TinyurlError::database_operation(format!("{}: {}", context, err)),
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err, DbErr::RecordNotInserted)
        || matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

pub struct DatabaseKeeper {
    db: DatabaseConnection,
    backend_name: &'static str,
    retry_config: RetryConfig,
    /// COUNT 缓存（TTL 30 秒），写入后失效
    count_cache: Cache<&'static str, u64>,
}

impl DatabaseKeeper {
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(
            &config.database_url,
            config.pool_size,
            config.timeout,
            RetryConfig::from(config),
        )
        .await
    }

    pub async fn new(
        database_url: &str,
        pool_size: u32,
        timeout_secs: u64,
        retry_config: RetryConfig,
    ) -> Result<Self> {
        if database_url.is_empty() {
            return Err(TinyurlError::database_config("database_url 未设置"));
        }

        let backend_name = infer_backend_from_url(database_url)?;
        let db = connection::open(
            database_url,
            backend_name,
            PoolSettings::new(pool_size, timeout_secs),
        )
        .await?;

        info!("{} keeper initialized", backend_name.to_uppercase());
        Ok(Self {
            db,
            backend_name,
            retry_config,
            count_cache: Cache::builder()
                .time_to_live(Duration::from_secs(30))
                .max_capacity(8)
                .build(),
        })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn invalidate_count_cache(&self) {
        self.count_cache.invalidate_all();
    }

    /// 与记录冲突的已有行（原始 URL 或短码相同）
    async fn find_conflicting(&self, record: &UrlRecord) -> Result<Option<UrlRecord>> {
        let model = data_url::Entity::find()
            .filter(
                Condition::any()
                    .add(data_url::Column::OriginalUrl.eq(record.original_url.as_str()))
                    .add(data_url::Column::ShortUrl.eq(record.short_key.as_str())),
            )
            .one(&self.db)
            .await
            .map_err(|e| db_error("查询冲突记录失败", e))?;
        Ok(model.map(model_to_url_record))
    }

    /// 在一个事务里给一组 (owner, 短码) 设置删除标记，返回实际变更的行数
    ///
    /// short_url 可能存的是完整短链接。候选行按 owner 取出后用
    /// `key_from_short_url` 精确比对短码，不拼 LIKE 模式。
    async fn tombstone_chunk(&self, chunk: &[(&str, String)]) -> std::result::Result<u64, DbErr> {
        let mut wanted: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (owner, key) in chunk {
            wanted.entry(*owner).or_default().insert(key.as_str());
        }

        let txn = self.db.begin().await?;
        let candidates = data_url::Entity::find()
            .filter(data_url::Column::IsDeleted.eq(false))
            .filter(data_url::Column::UserId.is_in(wanted.keys().copied()))
            .all(&txn)
            .await?;

        let ids: Vec<String> = candidates
            .into_iter()
            .filter(|m| {
                let key = key_from_short_url(&m.short_url);
                m.user_id
                    .as_deref()
                    .and_then(|owner| wanted.get(owner))
                    .is_some_and(|keys| keys.contains(key.as_str()))
            })
            .map(|m| m.correlation_id)
            .collect();

        if ids.is_empty() {
            txn.commit().await?;
            return Ok(0);
        }

        let result = data_url::Entity::update_many()
            .col_expr(data_url::Column::IsDeleted, Expr::value(true))
            .filter(data_url::Column::CorrelationId.is_in(ids))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(result.rows_affected)
    }

    async fn cached_count<F, Fut>(&self, key: &'static str, count: F) -> Result<usize>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<u64, DbErr>>,
    {
        if let Some(n) = self.count_cache.get(&key) {
            return Ok(n as usize);
        }
        let n = self.retry_config.run(key, count)
            .await
            .map_err(|e| db_error("统计失败", e))?;
        self.count_cache.insert(key, n);
        Ok(n as usize)
    }
}

#[async_trait]
impl Keeper for DatabaseKeeper {
    async fn load(&self) -> Result<UrlMap> {
        let db = &self.db;
        let models = self.retry_config.run("load", || {
            data_url::Entity::find().all(db)
        })
        .await
        .map_err(|e| db_error("加载链接失败", e))?;

        let links: UrlMap = models
            .into_iter()
            .map(|m| {
                let record = model_to_url_record(m);
                (record.key(), record)
            })
            .collect();
        info!("Loaded {} links from {}", links.len(), self.backend_name);
        Ok(links)
    }

    async fn load_users(&self) -> Result<UserMap> {
        let db = &self.db;
        let models = self.retry_config.run("load_users", || {
            user::Entity::find().all(db)
        })
        .await
        .map_err(|e| db_error("加载用户失败", e))?;

        let users: UserMap = models
            .into_iter()
            .map(|m| {
                let record = model_to_user_record(m);
                (record.email.clone(), record)
            })
            .collect();
        info!("Loaded {} users from {}", users.len(), self.backend_name);
        Ok(users)
    }

    async fn save(&self, key: &str, mut record: UrlRecord) -> Result<Inserted<UrlRecord>> {
        if record.short_key.is_empty() {
            record.short_key = key.to_string();
        }
        record.ensure_id();

        let db = &self.db;
        let model = url_record_to_active_model(&record);
        let result = self.retry_config.run("save", || {
            data_url::Entity::insert(model.clone())
                .on_conflict(
                    OnConflict::column(data_url::Column::OriginalUrl)
                        .do_nothing()
                        .to_owned(),
                )
                .exec(db)
        })
        .await;

        match result {
            Ok(_) => {
                self.invalidate_count_cache();
                debug!("Saved link {} -> {}", record.short_key, record.original_url);
                Ok(Inserted::Created(record))
            }
            Err(e) if is_unique_violation(&e) => match self.find_conflicting(&record).await? {
                Some(existing) => Ok(Inserted::Existing(existing)),
                None => Err(TinyurlError::conflict(format!(
                    "短链接已存在: {}",
                    record.short_key
                ))),
            },
            Err(e) => Err(db_error("保存链接失败", e)),
        }
    }

    async fn save_user(&self, key: &str, mut record: UserRecord) -> Result<Inserted<UserRecord>> {
        if record.email.is_empty() {
            record.email = key.to_string();
        }
        record.ensure_id();

        let db = &self.db;
        let model = user_record_to_active_model(&record);
        let result = self.retry_config.run("save_user", || {
            user::Entity::insert(model.clone())
                .on_conflict(OnConflict::column(user::Column::Email).do_nothing().to_owned())
                .exec(db)
        })
        .await;

        match result {
            Ok(_) => {
                self.invalidate_count_cache();
                Ok(Inserted::Created(record))
            }
            Err(e) if is_unique_violation(&e) => {
                let existing = user::Entity::find()
                    .filter(user::Column::Email.eq(record.email.as_str()))
                    .one(&self.db)
                    .await
                    .map_err(|e| db_error("查询用户失败", e))?
                    .map(model_to_user_record)
                    .ok_or_else(|| {
                        TinyurlError::conflict(format!("用户已存在: {}", record.email))
                    })?;

                if !record.password_hash.is_empty()
                    && !hash_matches(&existing.password_hash, &record.password_hash)
                {
                    return Err(TinyurlError::credential_mismatch(format!(
                        "credential mismatch for user {}",
                        record.email
                    )));
                }
                Ok(Inserted::Existing(existing))
            }
            Err(e) => Err(db_error("保存用户失败", e)),
        }
    }

    async fn save_batch(&self, batch: &UrlMap) -> Result<BatchReport> {
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| db_error("开始事务失败", e))?;

        let urls: Vec<&str> = batch.values().map(|r| r.original_url.as_str()).collect();
        let keys: Vec<&str> = batch
            .iter()
            .map(|(k, r)| {
                if r.short_key.is_empty() {
                    k.as_str()
                } else {
                    r.short_key.as_str()
                }
            })
            .collect();

        // 先取出会冲突的已有行，再在内存里判定哪些条目需要跳过
        let mut existing = UrlMap::new();
        for (url_chunk, key_chunk) in urls.chunks(INSERT_CHUNK).zip(keys.chunks(INSERT_CHUNK)) {
            let models = data_url::Entity::find()
                .filter(
                    Condition::any()
                        .add(data_url::Column::OriginalUrl.is_in(url_chunk.iter().copied()))
                        .add(data_url::Column::ShortUrl.is_in(key_chunk.iter().copied())),
                )
                .all(&txn)
                .await
                .map_err(|e| db_error("查询已有链接失败", e))?;
            for model in models {
                let record = model_to_url_record(model);
                existing.insert(record.key(), record);
            }
        }

        let mut index = LinkIndex::from_map(existing);
        let (report, created) = index.insert_batch(batch);

        for chunk in created.chunks(INSERT_CHUNK) {
            let models: Vec<data_url::ActiveModel> =
                chunk.iter().map(url_record_to_active_model).collect();
            match data_url::Entity::insert_many(models)
                .on_conflict(
                    OnConflict::column(data_url::Column::OriginalUrl)
                        .do_nothing()
                        .to_owned(),
                )
                .exec(&txn)
                .await
            {
                Ok(_) | Err(DbErr::RecordNotInserted) => {}
                Err(e) => return Err(db_error("批量插入失败", e)),
            }
        }

        txn.commit()
            .await
            .map_err(|e| db_error("提交事务失败", e))?;

        self.invalidate_count_cache();
        info!(
            "Batch saved {} links ({} skipped)",
            report.inserted,
            report.skipped.len()
        );
        Ok(report)
    }

    async fn update_batch(&self, requests: &[DeletionRequest]) -> Result<()> {
        let pairs: Vec<(&str, String)> = requests
            .iter()
            .flat_map(|r| r.pairs())
            .map(|(owner, key)| (owner, key_from_short_url(key)))
            .collect();
        if pairs.is_empty() {
            return Ok(());
        }

        let mut affected = 0u64;
        for chunk in pairs.chunks(UPDATE_CHUNK) {
            affected += self.retry_config.run("update_batch", || {
                self.tombstone_chunk(chunk)
            })
            .await
            .map_err(|e| db_error("设置删除标记失败", e))?;
        }

        info!(
            "Marked {} links deleted ({} requested)",
            affected,
            pairs.len()
        );
        Ok(())
    }

    async fn count_urls(&self) -> Result<usize> {
        let db = &self.db;
        self.cached_count(URLS_COUNT_KEY, || data_url::Entity::find().count(db))
            .await
    }

    async fn count_users(&self) -> Result<usize> {
        let db = &self.db;
        self.cached_count(USERS_COUNT_KEY, || user::Entity::find().count(db))
            .await
    }

    async fn ping(&self) -> bool {
        match tokio::time::timeout(PING_TIMEOUT, self.db.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("{} ping failed: {}", self.backend_name, e);
                false
            }
            Err(_) => {
                warn!("{} ping timed out", self.backend_name);
                false
            }
        }
    }

    async fn close(&self) -> bool {
        match self.db.clone().close().await {
            Ok(()) => {
                info!("{} connection pool closed", self.backend_name);
                true
            }
            Err(e) => {
                warn!("Failed to close {} pool: {}", self.backend_name, e);
                false
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        self.backend_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn sqlite_keeper() -> (DatabaseKeeper, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let keeper = DatabaseKeeper::new(&url, 1, 5, RetryConfig::default())
            .await
            .unwrap();
        (keeper, dir)
    }

    #[test]
    fn test_infer_backend_from_url() {
        assert_eq!(infer_backend_from_url("sqlite://data.db").unwrap(), "sqlite");
        assert_eq!(infer_backend_from_url("links.db").unwrap(), "sqlite");
        assert_eq!(infer_backend_from_url("mysql://u:p@h/db").unwrap(), "mysql");
        assert_eq!(infer_backend_from_url("mariadb://u:p@h/db").unwrap(), "mysql");
        assert_eq!(
            infer_backend_from_url("postgres://u:p@h/db").unwrap(),
            "postgres"
        );
        assert!(matches!(
            infer_backend_from_url("redis://h"),
            Err(TinyurlError::DatabaseConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let result = DatabaseKeeper::new("", 1, 5, RetryConfig::default()).await;
        assert!(matches!(result, Err(TinyurlError::DatabaseConfig(_))));
    }

    #[tokio::test]
    async fn test_save_then_conflict_returns_existing() {
        let (keeper, _dir) = sqlite_keeper().await;

        let first = keeper
            .save("abc", UrlRecord::new("abc", "http://x.com").with_owner("u1"))
            .await
            .unwrap();
        assert!(!first.is_conflict());

        let second = keeper
            .save("xyz", UrlRecord::new("xyz", "http://x.com"))
            .await
            .unwrap();
        assert!(second.is_conflict());
        assert_eq!(second.record().short_key, "abc");
        assert_eq!(second.record().id, first.record().id);

        let taken = keeper
            .save("abc", UrlRecord::new("abc", "http://y.com"))
            .await
            .unwrap();
        assert!(taken.is_conflict());
        assert_eq!(keeper.count_urls().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_batch_reports_skipped() {
        let (keeper, _dir) = sqlite_keeper().await;
        keeper
            .save("abc", UrlRecord::new("abc", "http://x.com"))
            .await
            .unwrap();

        let mut batch = UrlMap::new();
        batch.insert("k1".into(), UrlRecord::new("k1", "http://x.com"));
        batch.insert("k2".into(), UrlRecord::new("k2", "http://y.com"));

        let report = keeper.save_batch(&batch).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "k1");
        assert_eq!(report.skipped[0].1.short_key, "abc");

        // 再次提交同一批次不产生新行
        let again = keeper.save_batch(&batch).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(keeper.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_batch_matches_owner_and_full_short_url() {
        let (keeper, _dir) = sqlite_keeper().await;
        keeper
            .save(
                "abc",
                UrlRecord::new("http://localhost:8080/abc", "http://x.com").with_owner("u1"),
            )
            .await
            .unwrap();
        keeper
            .save("def", UrlRecord::new("def", "http://y.com").with_owner("u2"))
            .await
            .unwrap();

        keeper
            .update_batch(&[
                DeletionRequest::new("u1", ["abc"]),
                DeletionRequest::new("u1", ["def"]),
            ])
            .await
            .unwrap();

        let links = keeper.load().await.unwrap();
        assert!(links["abc"].deleted);
        assert!(!links["def"].deleted);
    }

    #[tokio::test]
    async fn test_update_batch_treats_wildcards_literally() {
        let (keeper, _dir) = sqlite_keeper().await;
        for (key, url) in [
            ("abc", "http://x.com"),
            ("def", "http://y.com"),
            ("axc", "http://z.com"),
        ] {
            keeper
                .save(
                    key,
                    UrlRecord::new(format!("http://h/{}", key), url).with_owner("u1"),
                )
                .await
                .unwrap();
        }

        keeper
            .update_batch(&[DeletionRequest::new("u1", ["%", "a_c", "_bc"])])
            .await
            .unwrap();

        let links = keeper.load().await.unwrap();
        assert_eq!(links.len(), 3);
        assert!(links.values().all(|r| !r.deleted));
    }

    #[tokio::test]
    async fn test_save_user_credentials() {
        let (keeper, _dir) = sqlite_keeper().await;
        keeper
            .save_user("a@b.c", UserRecord::new("a@b.c", "h1"))
            .await
            .unwrap();

        let same = keeper
            .save_user("a@b.c", UserRecord::new("a@b.c", "h1"))
            .await
            .unwrap();
        assert!(same.is_conflict());

        let wrong = keeper
            .save_user("a@b.c", UserRecord::new("a@b.c", "h2"))
            .await;
        assert!(matches!(wrong, Err(TinyurlError::CredentialMismatch(_))));
        assert_eq!(keeper.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ping_and_close() {
        let (keeper, _dir) = sqlite_keeper().await;
        assert!(keeper.ping().await);
        assert!(keeper.close().await);
        assert!(!keeper.ping().await);
    }
}
