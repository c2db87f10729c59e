//! 运行时装配与优雅关闭

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::StaticConfig;
use crate::errors::Result;
use crate::storage::{KeeperFactory, Storage};
use crate::worker::{DeletionSink, DeletionWorker};

/// 整个关闭流程的超时时间（秒）
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// 单个关闭任务的超时时间（秒）
const TASK_TIMEOUT_SECS: u64 = 10;

/// 已启动的存储引擎和删除 worker
pub struct Runtime {
    storage: Arc<Storage>,
    worker: Arc<DeletionWorker>,
}

impl Runtime {
    /// 按配置选定 keeper，打开引擎并启动 worker
    pub async fn start(config: &StaticConfig) -> Result<Self> {
        let keeper = KeeperFactory::create(&config.storage).await?;
        let storage = Arc::new(Storage::open(keeper).await);

        if !storage.ping().await {
            warn!(
                "Persistence unavailable on {} keeper, running without durability",
                storage.backend_name()
            );
        }

        let sink: Arc<dyn DeletionSink> = storage.clone();
        let worker = Arc::new(DeletionWorker::new(sink, config.worker.clone()));
        worker.start()?;

        Ok(Self { storage, worker })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn worker(&self) -> &Arc<DeletionWorker> {
        &self.worker
    }

    /// 停止 worker（含最后一次刷盘），再关闭 keeper
    ///
    /// 超时返回 false，调用方可据此决定退出码。
    pub async fn shutdown(&self) -> bool {
        info!("Shutting down, flushing pending deletions...");
        match timeout(
            Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
            self.perform_shutdown_tasks(),
        )
        .await
        {
            Ok(()) => {
                info!("All shutdown tasks completed successfully");
                true
            }
            Err(_) => {
                error!(
                    "Shutdown tasks timed out after {} seconds",
                    SHUTDOWN_TIMEOUT_SECS
                );
                false
            }
        }
    }

    async fn perform_shutdown_tasks(&self) {
        let task_timeout = Duration::from_secs(TASK_TIMEOUT_SECS);

        match timeout(task_timeout, self.worker.stop()).await {
            Ok(()) => info!("Deletion worker stopped"),
            Err(_) => error!(
                "Deletion worker stop timed out after {} seconds",
                TASK_TIMEOUT_SECS
            ),
        }

        match timeout(task_timeout, self.storage.close()).await {
            Ok(true) => info!("{} keeper closed", self.storage.backend_name()),
            Ok(false) => warn!("{} keeper did not close cleanly", self.storage.backend_name()),
            Err(_) => error!("Keeper close timed out after {} seconds", TASK_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DeletionRequest, UrlRecord};
    use crate::worker::WorkerState;

    #[tokio::test]
    async fn test_start_and_shutdown_memory() {
        let runtime = Runtime::start(&StaticConfig::default()).await.unwrap();
        assert_eq!(runtime.storage().backend_name(), "memory");
        assert_eq!(runtime.worker().state(), WorkerState::Running);

        runtime
            .storage()
            .insert_url("abc", UrlRecord::new("abc", "http://x.com").with_owner("u1"))
            .await
            .unwrap();
        runtime
            .worker()
            .add(DeletionRequest::new("u1", ["abc"]))
            .await
            .unwrap();

        assert!(runtime.shutdown().await);
        assert_eq!(runtime.worker().state(), WorkerState::Stopped);
        assert!(runtime.storage().get_url("abc").unwrap().deleted);
    }
}
