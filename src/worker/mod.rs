//! 删除任务后台 worker
//!
//! 负责收集删除请求并批量刷到存储引擎，支持：
//! - 有界队列投递，队列满时才等待
//! - 定时刷盘
//! - 阈值触发刷盘
//! - 刷盘失败保留缓冲区，下个周期重试，期间不再触发阈值刷盘
//! - 停止时可选地做最后一次刷盘

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::WorkerConfig;
use crate::errors::{Result, TinyurlError};
use crate::storage::models::DeletionRequest;

/// 删除请求的落地端
#[async_trait]
pub trait DeletionSink: Send + Sync {
    async fn apply_deletions(&self, requests: &[DeletionRequest]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
}

/// 累积缓冲区，同一用户的请求合并为一条
#[derive(Default)]
struct PendingBuffer {
    requests: Vec<DeletionRequest>,
}

impl PendingBuffer {
    /// 并入一个请求，返回累积的短码总数
    fn push(&mut self, request: DeletionRequest) -> usize {
        match self
            .requests
            .iter_mut()
            .find(|r| r.owner_id == request.owner_id)
        {
            Some(existing) => existing.merge(request),
            None => self.requests.push(request),
        }
        self.key_count()
    }

    fn key_count(&self) -> usize {
        self.requests.iter().map(|r| r.short_keys.len()).sum()
    }
}

/// 后台任务与 worker 句柄共享的状态
struct Shared {
    buffer: Mutex<PendingBuffer>,
    /// 缓冲区中的请求数（合并后），用于监控
    pending: AtomicUsize,
    sink: Arc<dyn DeletionSink>,
}

impl Shared {
    async fn push(&self, request: DeletionRequest) -> usize {
        let mut buffer = self.buffer.lock().await;
        let keys = buffer.push(request);
        self.pending.store(buffer.requests.len(), Ordering::Relaxed);
        keys
    }

    /// 把缓冲区交给 sink；失败时缓冲区原样保留
    async fn flush(&self) -> Result<usize> {
        let mut buffer = self.buffer.lock().await;
        if buffer.requests.is_empty() {
            trace!("DeletionWorker: nothing to flush");
            return Ok(0);
        }

        let keys = buffer.key_count();
        match self.sink.apply_deletions(&buffer.requests).await {
            Ok(()) => {
                buffer.requests.clear();
                self.pending.store(0, Ordering::Relaxed);
                debug!("DeletionWorker: flushed {} short keys", keys);
                Ok(keys)
            }
            Err(e) => {
                warn!(
                    "DeletionWorker: flush failed: {}, {} short keys kept for retry",
                    e, keys
                );
                Err(e)
            }
        }
    }
}

#[derive(Default)]
struct Control {
    tx: Option<mpsc::Sender<DeletionRequest>>,
    cancel: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

/// 删除 worker
///
/// 生命周期为 Idle -> Running -> Stopped，停止后不能再启动。
pub struct DeletionWorker {
    shared: Arc<Shared>,
    config: WorkerConfig,
    state: parking_lot::Mutex<WorkerState>,
    control: parking_lot::Mutex<Control>,
}

impl DeletionWorker {
    pub fn new(sink: Arc<dyn DeletionSink>, config: WorkerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(PendingBuffer::default()),
                pending: AtomicUsize::new(0),
                sink,
            }),
            config,
            state: parking_lot::Mutex::new(WorkerState::Idle),
            control: parking_lot::Mutex::new(Control::default()),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// 缓冲区中尚未刷盘的请求数
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }

    /// 启动后台任务，须在 tokio 运行时内调用
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            WorkerState::Running => return Ok(()),
            WorkerState::Stopped => {
                return Err(TinyurlError::worker_unavailable(
                    "deletion worker already stopped",
                ));
            }
            WorkerState::Idle => {}
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.shared),
            self.config.clone(),
            rx,
            cancel_rx,
        ));

        *self.control.lock() = Control {
            tx: Some(tx),
            cancel: Some(cancel_tx),
            handle: Some(handle),
        };
        *state = WorkerState::Running;

        info!(
            "Deletion worker started (interval {}s, queue {})",
            self.config.flush_interval().as_secs(),
            self.config.queue_capacity
        );
        Ok(())
    }

    /// 投递删除请求
    ///
    /// 正常情况下立即返回；队列满时等待空位。worker 未运行时返回
    /// `WorkerUnavailable`。
    pub async fn add(&self, request: DeletionRequest) -> Result<()> {
        if request.short_keys.is_empty() {
            return Ok(());
        }

        let tx = self
            .control
            .lock()
            .tx
            .clone()
            .ok_or_else(|| TinyurlError::worker_unavailable("deletion worker is not running"))?;

        match tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!("Deletion queue full, waiting for capacity");
                tx.send(request).await.map_err(|_| {
                    TinyurlError::worker_unavailable("deletion worker stopped while enqueuing")
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TinyurlError::worker_unavailable(
                "deletion worker is not running",
            )),
        }
    }

    /// 立即刷盘，返回刷出的短码数
    pub async fn flush(&self) -> Result<usize> {
        debug!("DeletionWorker: manual flush triggered");
        self.shared.flush().await
    }

    /// 通知后台任务退出并等待其结束
    pub async fn stop(&self) {
        let control = {
            let mut state = self.state.lock();
            if *state == WorkerState::Stopped {
                return;
            }
            *state = WorkerState::Stopped;
            std::mem::take(&mut *self.control.lock())
        };

        // 先丢掉发送端，之后的 add 立即失败
        drop(control.tx);
        if let Some(cancel) = control.cancel {
            let _ = cancel.send(true);
        }
        if let Some(handle) = control.handle
            && let Err(e) = handle.await
        {
            error!("Deletion worker task failed: {}", e);
        }

        info!("Deletion worker stopped");
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    config: WorkerConfig,
    mut rx: mpsc::Receiver<DeletionRequest>,
    mut cancel: watch::Receiver<bool>,
) {
    let period = config.flush_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 刷盘失败后只在定时周期重试，直到某次定时刷盘成功
    let mut backing_off = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = ticker.tick() => {
                debug!("DeletionWorker: scheduled flush");
                backing_off = shared.flush().await.is_err();
            }
            received = rx.recv() => match received {
                Some(request) => {
                    let keys = shared.push(request).await;
                    if !backing_off && keys >= config.max_pending_before_flush {
                        debug!("DeletionWorker: {} pending keys, flushing early", keys);
                        backing_off = shared.flush().await.is_err();
                    }
                }
                None => break,
            },
        }
    }

    // 收下已入队但尚未处理的请求
    rx.close();
    while let Ok(request) = rx.try_recv() {
        shared.push(request).await;
    }

    let pending = shared.pending.load(Ordering::Relaxed);
    if pending == 0 {
        return;
    }
    if config.flush_on_stop {
        if shared.flush().await.is_err() {
            error!(
                "DeletionWorker: final flush failed, {} requests lost",
                shared.pending.load(Ordering::Relaxed)
            );
        }
    } else {
        warn!("DeletionWorker: dropping {} unflushed requests", pending);
    }
}
