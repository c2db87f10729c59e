//! keeper 写入的退避重试
//!
//! 错误先按 [`Transient`] 归类：连接丢失和锁冲突会退避后重试，
//! 唯一约束之类的语义错误原样交还调用方。

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use sea_orm::DbErr;
use sea_orm::error::RuntimeErr;
use strum::AsRefStr;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::StorageConfig;

/// 可以重试的瞬时故障
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Transient {
    /// 连接断开或连接池取不到连接
    Connection,
    Deadlock,
    LockTimeout,
    /// PostgreSQL 序列化失败
    Serialization,
    /// SQLite BUSY / LOCKED
    Busy,
}

impl Transient {
    /// 归类数据库错误，不可重试时返回 `None`
    pub fn of(err: &DbErr) -> Option<Self> {
        match err {
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => Some(Self::Connection),
            DbErr::Exec(runtime) | DbErr::Query(runtime) => Self::of_runtime(runtime),
            _ => None,
        }
    }

    fn of_runtime(err: &RuntimeErr) -> Option<Self> {
        let message = match err {
            RuntimeErr::SqlxError(sqlx_err) => {
                // 有错误码时只看错误码
                if let Some(db_err) = sqlx_err.as_database_error()
                    && let Some(code) = db_err.code()
                {
                    return Self::from_code(&code);
                }
                sqlx_err.to_string()
            }
            RuntimeErr::Internal(msg) => msg.clone(),
            #[allow(unreachable_patterns)]
            _ => return None,
        };
        Self::from_message(&message.to_lowercase())
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            // MySQL / PostgreSQL
            "1213" | "40P01" => Some(Self::Deadlock),
            "1205" => Some(Self::LockTimeout),
            "40001" => Some(Self::Serialization),
            // SQLite
            "5" | "6" => Some(Self::Busy),
            _ => None,
        }
    }

    fn from_message(message: &str) -> Option<Self> {
        if message.contains("deadlock") {
            Some(Self::Deadlock)
        } else if message.contains("lock wait timeout") {
            Some(Self::LockTimeout)
        } else if message.contains("database is locked") {
            Some(Self::Busy)
        } else if message.contains("serialization failure") {
            Some(Self::Serialization)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl From<&StorageConfig> for RetryConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_retries: config.retry_count,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }
}

impl RetryConfig {
    /// 第 `attempt` 次重试前的等待：指数增长，封顶后再加 0-25% 抖动
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay_ms);
        let jitter = rand::rng().random_range(0..=capped / 4);
        Duration::from_millis(capped.saturating_add(jitter))
    }

    /// 执行 `operation`，遇到瞬时故障时退避重试，最多 `max_retries` 次
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, DbErr>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            "Keeper operation '{}' recovered after {} retries",
                            operation_name, attempt
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let Some(kind) = Transient::of(&err) else {
                return Err(err);
            };
            if attempt >= self.max_retries {
                warn!(
                    "Keeper operation '{}' gave up after {} retries ({}): {}",
                    operation_name,
                    attempt,
                    kind.as_ref(),
                    err
                );
                return Err(err);
            }

            attempt += 1;
            let delay = self.backoff(attempt);
            warn!(
                "Keeper operation '{}' hit {} (retry {}/{} in {} ms): {}",
                operation_name,
                kind.as_ref(),
                attempt,
                self.max_retries,
                delay.as_millis(),
                err
            );
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay_ms: 5,
            max_delay_ms: 20,
        }
    }

    #[test]
    fn test_transient_classification() {
        assert_eq!(
            Transient::of(&DbErr::ConnectionAcquire(
                sea_orm::error::ConnAcquireErr::Timeout
            )),
            Some(Transient::Connection)
        );
        assert_eq!(
            Transient::of(&DbErr::Exec(RuntimeErr::Internal(
                "database is locked".to_string()
            ))),
            Some(Transient::Busy)
        );
        assert_eq!(
            Transient::of(&DbErr::Query(RuntimeErr::Internal(
                "Deadlock found when trying to get lock".to_string()
            ))),
            Some(Transient::Deadlock)
        );
        assert_eq!(
            Transient::of(&DbErr::RecordNotFound("missing".to_string())),
            None
        );
        assert_eq!(Transient::of(&DbErr::Custom("bad input".to_string())), None);
        assert_eq!(Transient::LockTimeout.as_ref(), "lock_timeout");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig::default();

        let first = config.backoff(1).as_millis();
        assert!((100..=125).contains(&first));

        let third = config.backoff(3).as_millis();
        assert!((400..=500).contains(&third));

        let capped = config.backoff(12).as_millis();
        assert!((2000..=2500).contains(&capped));
    }

    #[test]
    fn test_from_storage_config() {
        let storage = StorageConfig {
            retry_count: 5,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 30,
            ..Default::default()
        };
        let config = RetryConfig::from(&storage);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay_ms, 10);
        assert_eq!(config.max_delay_ms, 30);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(DbErr::ConnectionAcquire(
                            sea_orm::error::ConnAcquireErr::Timeout,
                        ))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("down", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(DbErr::Conn(RuntimeErr::Internal(
                        "connection refused".to_string(),
                    )))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_semantic_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("conflict", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(DbErr::RecordNotInserted) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
