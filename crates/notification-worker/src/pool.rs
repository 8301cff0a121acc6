//! 通知任务池
//!
//! 固定数量的 worker 竞争消费同一个有界队列。队列满时的行为由
//! `OverflowPolicy` 决定：阻塞等待、丢弃计数或立即报错。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tasktrack_shared::config::{NotificationPoolConfig, OverflowPolicy};
use tasktrack_shared::observability::metrics;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::PoolError;
use crate::job::NotificationJob;
use crate::store::NotificationStore;

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<NotificationJob>>>;

/// 提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued,
    /// 队列已满，按 drop 策略被丢弃
    Dropped,
}

/// 后台通知任务池
pub struct JobPool {
    /// `stop` 时取走并丢弃，队列随之关闭
    sender: parking_lot::RwLock<Option<mpsc::Sender<NotificationJob>>>,
    receiver: SharedReceiver,
    store: Arc<dyn NotificationStore>,
    config: NotificationPoolConfig,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    dropped: AtomicU64,
}

impl JobPool {
    pub fn new(store: Arc<dyn NotificationStore>, config: NotificationPoolConfig) -> Self {
        let config = NotificationPoolConfig {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        let (sender, receiver) = mpsc::channel(config.queue_capacity);

        Self {
            sender: parking_lot::RwLock::new(Some(sender)),
            receiver: Arc::new(AsyncMutex::new(receiver)),
            store,
            config,
            workers: parking_lot::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// 启动 worker
    ///
    /// `shutdown` 变为 true 时 worker 处理完当前任务后退出，不再清空队列。
    /// 重复调用只记录告警。
    pub fn start(&self, shutdown: watch::Receiver<bool>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("通知任务池已启动，忽略重复的 start 调用");
            return;
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.workers {
            workers.push(tokio::spawn(run_worker(
                worker_id,
                self.receiver.clone(),
                self.store.clone(),
                shutdown.clone(),
            )));
        }

        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            overflow_policy = ?self.config.overflow_policy,
            "通知任务池已启动"
        );
    }

    /// 按配置的溢出策略提交任务
    pub async fn submit(&self, job: NotificationJob) -> Result<SubmitOutcome, PoolError> {
        match self.config.overflow_policy {
            OverflowPolicy::Block => {
                // 先克隆 sender 再等待，不能持锁跨越 await
                let sender = self.current_sender()?;
                sender.send(job).await.map_err(|_| PoolError::Closed)?;
                Ok(SubmitOutcome::Enqueued)
            }
            OverflowPolicy::Drop => {
                let task_id = job.task_id;
                match self.try_submit(job) {
                    Ok(()) => Ok(SubmitOutcome::Enqueued),
                    Err(PoolError::QueueFull) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        metrics::record_notification_dropped();
                        warn!(task_id, "通知队列已满，丢弃任务");
                        Ok(SubmitOutcome::Dropped)
                    }
                    Err(e) => Err(e),
                }
            }
            OverflowPolicy::Reject => self.try_submit(job).map(|_| SubmitOutcome::Enqueued),
        }
    }

    /// 非阻塞提交，忽略溢出策略
    pub fn try_submit(&self, job: NotificationJob) -> Result<(), PoolError> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(PoolError::Closed)?;
        sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
        })
    }

    /// 关闭队列并等待 worker 处理完剩余任务后退出
    pub async fn stop(&self) {
        drop(self.sender.write().take());

        let mut workers = std::mem::take(&mut *self.workers.lock());
        let count = workers.len();
        join_workers(&mut workers).await;

        info!(workers = count, dropped = self.dropped(), "通知任务池已停止");
    }

    /// 限时排空队列
    ///
    /// 超时后通过 `cancel`（与 `start` 收到的接收端配对）通知 worker 放弃剩余任务，
    /// 并等待它们处理完当前任务后退出。返回是否在时限内排空。
    pub async fn stop_within(&self, drain_timeout: Duration, cancel: &watch::Sender<bool>) -> bool {
        drop(self.sender.write().take());

        let mut workers = std::mem::take(&mut *self.workers.lock());
        let count = workers.len();
        let drained = tokio::time::timeout(drain_timeout, join_workers(&mut workers))
            .await
            .is_ok();

        if !drained {
            warn!(
                timeout_ms = drain_timeout.as_millis() as u64,
                remaining_workers = workers.len(),
                "通知任务池排空超时，放弃剩余任务"
            );
            if cancel.send(true).is_err() {
                debug!("停止信号无接收方，worker 均已退出");
            }
            join_workers(&mut workers).await;
        }

        info!(workers = count, drained, dropped = self.dropped(), "通知任务池已停止");
        drained
    }

    /// 被 drop 策略丢弃的任务数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 正在运行的 worker 数量
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    fn current_sender(&self) -> Result<mpsc::Sender<NotificationJob>, PoolError> {
        self.sender.read().clone().ok_or(PoolError::Closed)
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: SharedReceiver,
    store: Arc<dyn NotificationStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "通知 worker 已启动");

    loop {
        let job = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => {
                info!(worker_id, "收到停止信号，通知 worker 退出");
                break;
            }
            job = next_job(&receiver) => match job {
                Some(job) => job,
                None => break,
            },
        };

        persist(worker_id, store.as_ref(), job).await;
    }

    debug!(worker_id, "通知 worker 已退出");
}

/// 逐个等待 worker 退出；中途被取消时未结束的句柄留在列表中
async fn join_workers(workers: &mut Vec<JoinHandle<()>>) {
    while let Some(handle) = workers.last_mut() {
        if let Err(e) = handle.await {
            error!(error = %e, "通知 worker 异常退出");
        }
        workers.pop();
    }
}

async fn next_job(receiver: &AsyncMutex<mpsc::Receiver<NotificationJob>>) -> Option<NotificationJob> {
    receiver.lock().await.recv().await
}

/// 等待停止信号；发送端被丢弃且从未置 true 时永不返回
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn persist(worker_id: usize, store: &dyn NotificationStore, job: NotificationJob) {
    let started = Instant::now();
    match store.insert_notification(&job, Utc::now()).await {
        Ok(()) => {
            debug!(worker_id, task_id = job.task_id, "通知已持久化");
            metrics::record_notification_job("success", started.elapsed().as_secs_f64());
        }
        Err(e) => {
            error!(
                worker_id,
                task_id = job.task_id,
                error = %e,
                retryable = e.is_retryable(),
                "通知持久化失败，任务丢弃"
            );
            metrics::record_notification_job("failed", started.elapsed().as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockNotificationStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::time::Duration;
    use tasktrack_shared::error::TaskError;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct RecordingStore {
        jobs: parking_lot::Mutex<Vec<NotificationJob>>,
    }

    impl RecordingStore {
        fn written(&self) -> Vec<NotificationJob> {
            self.jobs.lock().clone()
        }
    }

    #[async_trait]
    impl NotificationStore for RecordingStore {
        async fn insert_notification(
            &self,
            job: &NotificationJob,
            _created_at: DateTime<Utc>,
        ) -> Result<(), PoolError> {
            self.jobs.lock().push(job.clone());
            Ok(())
        }
    }

    fn config(workers: usize, queue_capacity: usize, policy: OverflowPolicy) -> NotificationPoolConfig {
        NotificationPoolConfig {
            workers,
            queue_capacity,
            overflow_policy: policy,
        }
    }

    fn idle_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_stop_drains_all_submitted_jobs() {
        let store = Arc::new(RecordingStore::default());
        let pool = JobPool::new(store.clone(), config(3, 10, OverflowPolicy::Block));
        let (_tx, rx) = idle_shutdown();
        pool.start(rx);

        for i in 0..10 {
            let outcome = pool
                .submit(NotificationJob::new(i, format!("task {i}")))
                .await
                .unwrap();
            assert_eq!(outcome, SubmitOutcome::Enqueued);
        }
        pool.stop().await;

        let mut ids: Vec<i64> = store.written().iter().map(|j| j.task_id).collect();
        ids.sort();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_single_worker_writes_job_once() {
        let mut store = MockNotificationStore::new();
        store
            .expect_insert_notification()
            .withf(|job, _| job.task_id == 5 && job.message == "m")
            .times(1)
            .returning(|_, _| Ok(()));

        let pool = JobPool::new(Arc::new(store), config(1, 100, OverflowPolicy::Block));
        let (_tx, rx) = idle_shutdown();
        pool.start(rx);

        assert_ok!(pool.submit(NotificationJob::new(5, "m")).await);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_free_slot() {
        let store = Arc::new(RecordingStore::default());
        let pool = Arc::new(JobPool::new(store.clone(), config(1, 2, OverflowPolicy::Block)));

        // 尚未启动 worker，前两个任务填满队列
        assert_ok!(pool.submit(NotificationJob::new(1, "a")).await);
        assert_ok!(pool.submit(NotificationJob::new(2, "b")).await);

        let blocked = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(NotificationJob::new(3, "c")).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        let (_tx, rx) = idle_shutdown();
        pool.start(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("blocked submit should resume")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Enqueued);

        pool.stop().await;
        assert_eq!(store.written().len(), 3);
    }

    #[tokio::test]
    async fn test_drop_policy_counts_dropped_jobs() {
        let store = Arc::new(RecordingStore::default());
        let pool = JobPool::new(store.clone(), config(1, 1, OverflowPolicy::Drop));

        assert_eq!(
            pool.submit(NotificationJob::new(1, "kept")).await.unwrap(),
            SubmitOutcome::Enqueued
        );
        assert_eq!(
            pool.submit(NotificationJob::new(2, "lost")).await.unwrap(),
            SubmitOutcome::Dropped
        );
        assert_eq!(pool.dropped(), 1);

        let (_tx, rx) = idle_shutdown();
        pool.start(rx);
        pool.stop().await;

        assert_eq!(store.written(), vec![NotificationJob::new(1, "kept")]);
    }

    #[tokio::test]
    async fn test_reject_policy_returns_queue_full() {
        let pool = JobPool::new(
            Arc::new(RecordingStore::default()),
            config(1, 1, OverflowPolicy::Reject),
        );

        assert_ok!(pool.submit(NotificationJob::new(1, "a")).await);
        let err = pool.submit(NotificationJob::new(2, "b")).await.unwrap_err();
        assert!(matches!(err, PoolError::QueueFull));
        assert_eq!(pool.dropped(), 0);
    }

    #[tokio::test]
    async fn test_try_submit_ignores_block_policy() {
        let pool = JobPool::new(
            Arc::new(RecordingStore::default()),
            config(1, 1, OverflowPolicy::Block),
        );

        assert_ok!(pool.try_submit(NotificationJob::new(1, "a")));
        assert!(matches!(
            pool.try_submit(NotificationJob::new(2, "b")),
            Err(PoolError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_closed() {
        let pool = JobPool::new(
            Arc::new(RecordingStore::default()),
            config(2, 4, OverflowPolicy::Block),
        );
        let (_tx, rx) = idle_shutdown();
        pool.start(rx);
        pool.stop().await;

        let err = pool.submit(NotificationJob::new(1, "late")).await.unwrap_err();
        assert!(matches!(err, PoolError::Closed));
        assert_err!(pool.try_submit(NotificationJob::new(2, "late")));
    }

    #[tokio::test]
    async fn test_store_error_does_not_stop_worker() {
        let mut store = MockNotificationStore::new();
        store
            .expect_insert_notification()
            .times(3)
            .returning(|job, _| {
                if job.task_id == 1 {
                    Err(TaskError::Internal("connection reset".to_string()).into())
                } else {
                    Ok(())
                }
            });

        let pool = JobPool::new(Arc::new(store), config(1, 10, OverflowPolicy::Block));
        let (_tx, rx) = idle_shutdown();
        pool.start(rx);

        for i in 1..=3 {
            assert_ok!(pool.submit(NotificationJob::new(i, "x")).await);
        }
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_signal_exits_workers_without_draining() {
        let store = Arc::new(RecordingStore::default());
        let pool = JobPool::new(store.clone(), config(2, 10, OverflowPolicy::Block));
        let (tx, rx) = idle_shutdown();
        pool.start(rx);

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // worker 已退出，队列仍可入队但不会被处理
        assert_ok!(pool.try_submit(NotificationJob::new(9, "never")));

        let stopped = tokio::time::timeout(Duration::from_secs(1), pool.stop()).await;
        assert!(stopped.is_ok());
        assert!(store.written().is_empty());
    }

    struct SlowStore {
        delay: Duration,
        written: std::sync::atomic::AtomicUsize,
    }

    impl SlowStore {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                written: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn written(&self) -> usize {
            self.written.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationStore for SlowStore {
        async fn insert_notification(
            &self,
            _job: &NotificationJob,
            _created_at: DateTime<Utc>,
        ) -> Result<(), PoolError> {
            tokio::time::sleep(self.delay).await;
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_within_cancels_and_awaits_workers() {
        let store = Arc::new(SlowStore::new(Duration::from_secs(60)));
        let pool = JobPool::new(store.clone(), config(1, 10, OverflowPolicy::Block));
        let (tx, rx) = idle_shutdown();
        pool.start(rx);

        for i in 0..3 {
            assert_ok!(pool.submit(NotificationJob::new(i, "slow")).await);
        }

        let drained = pool.stop_within(Duration::from_secs(1), &tx).await;

        // 超时后仍等到当前任务写完，剩余任务被放弃
        assert!(!drained);
        assert_eq!(store.written(), 1);
        assert_eq!(pool.worker_count(), 0);
        assert!(*tx.borrow());
    }

    #[tokio::test]
    async fn test_stop_within_drains_in_time() {
        let store = Arc::new(RecordingStore::default());
        let pool = JobPool::new(store.clone(), config(2, 10, OverflowPolicy::Block));
        let (tx, rx) = idle_shutdown();
        pool.start(rx);

        for i in 0..5 {
            assert_ok!(pool.submit(NotificationJob::new(i, "m")).await);
        }

        assert!(pool.stop_within(Duration::from_secs(5), &tx).await);
        assert_eq!(store.written().len(), 5);
        assert!(!*tx.borrow());
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let pool = JobPool::new(
            Arc::new(RecordingStore::default()),
            config(3, 10, OverflowPolicy::Block),
        );
        let (_tx, rx) = idle_shutdown();
        pool.start(rx.clone());
        pool.start(rx);

        assert_eq!(pool.worker_count(), 3);
        pool.stop().await;
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn test_zero_sized_config_is_clamped() {
        let pool = JobPool::new(
            Arc::new(RecordingStore::default()),
            config(0, 0, OverflowPolicy::Reject),
        );
        assert_eq!(pool.config.workers, 1);
        assert_eq!(pool.config.queue_capacity, 1);
    }
}
