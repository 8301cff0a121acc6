//! 任务变更事件发布
//!
//! 任务 CRUD 处理器在数据落库后调用，完成两件互不依赖的事：
//! 向通知任务池提交持久化任务，向推送 Hub 发送实时事件。两者都是尽力而为，
//! 失败只记录日志，不影响原请求的结果。

use std::sync::Arc;

use notification_worker::{JobPool, NotificationJob, SubmitOutcome};
use realtime_hub::{HubHandle, TaskEventKind, TaskEventMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 删除事件没有任务描述可用，使用固定文案
const TASK_DELETED_DESCRIPTION: &str = "Task deleted";

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

/// 事件发布所需的任务快照
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: i64,
    /// 任务所属用户 ID，即推送路由键
    pub owner_id: String,
    pub description: String,
    pub status: TaskStatus,
}

/// 任务事件发布器
///
/// 任务池或 Hub 未配置时对应的一侧为空操作。
#[derive(Clone, Default)]
pub struct TaskEventPublisher {
    pool: Option<Arc<JobPool>>,
    hub: Option<HubHandle>,
}

impl TaskEventPublisher {
    pub fn new(pool: Option<Arc<JobPool>>, hub: Option<HubHandle>) -> Self {
        Self { pool, hub }
    }

    /// 任务已创建：总是生成通知
    pub async fn task_created(&self, task: &TaskSnapshot) {
        self.enqueue(task.id, format!("New task created: {}", task.description))
            .await;
        self.publish(TaskEventKind::TaskCreated, &task.owner_id, task.id, &task.description);
    }

    /// 任务已更新：仅在状态为完成时生成通知
    pub async fn task_updated(&self, task: &TaskSnapshot) {
        if task.status == TaskStatus::Done {
            self.enqueue(task.id, format!("Task '{}' marked as done.", task.description))
                .await;
        }
        self.publish(TaskEventKind::TaskUpdated, &task.owner_id, task.id, &task.description);
    }

    /// 任务已删除：只推送，不生成通知
    pub fn task_deleted(&self, owner_id: &str, task_id: i64) {
        self.publish(TaskEventKind::TaskDeleted, owner_id, task_id, TASK_DELETED_DESCRIPTION);
    }

    async fn enqueue(&self, task_id: i64, message: String) {
        let Some(pool) = &self.pool else {
            return;
        };

        match pool.submit(NotificationJob::new(task_id, message)).await {
            Ok(SubmitOutcome::Enqueued) => debug!(task_id, "通知任务已入队"),
            Ok(SubmitOutcome::Dropped) => debug!(task_id, "通知任务被丢弃"),
            Err(e) => warn!(task_id, error = %e, "通知任务提交失败"),
        }
    }

    fn publish(&self, kind: TaskEventKind, owner_id: &str, task_id: i64, description: &str) {
        let Some(hub) = &self.hub else {
            return;
        };

        let event = match TaskEventMessage::new(kind, task_id, description).into_broadcast(owner_id) {
            Ok(event) => event,
            Err(e) => {
                warn!(task_id, error = %e, "任务事件序列化失败");
                return;
            }
        };

        if let Err(e) = hub.broadcast(event) {
            warn!(task_id, owner_id = %owner_id, error = %e, "任务事件推送失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Utc};
    use notification_worker::{NotificationStore, PoolError};
    use realtime_hub::{Client, Hub};
    use std::time::Duration;
    use tasktrack_shared::config::{HubConfig, NotificationPoolConfig, OverflowPolicy};
    use tokio::sync::{mpsc, watch};

    #[derive(Default)]
    struct RecordingStore {
        jobs: parking_lot::Mutex<Vec<NotificationJob>>,
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

    fn task(id: i64, owner: &str, description: &str, status: TaskStatus) -> TaskSnapshot {
        TaskSnapshot {
            id,
            owner_id: owner.to_string(),
            description: description.to_string(),
            status,
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<Bytes>) -> serde_json::Value {
        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbound channel closed");
        serde_json::from_slice(&payload).unwrap()
    }

    struct Fixture {
        publisher: TaskEventPublisher,
        pool: Arc<JobPool>,
        store: Arc<RecordingStore>,
        outbound: mpsc::Receiver<Bytes>,
        _shutdown: watch::Sender<bool>,
    }

    impl Fixture {
        fn new(owner: &str) -> Self {
            let store = Arc::new(RecordingStore::default());
            let pool = Arc::new(JobPool::new(store.clone(), NotificationPoolConfig::default()));
            let (shutdown, rx) = watch::channel(false);
            pool.start(rx);

            let (hub, _task) = Hub::spawn(&HubConfig::default());
            let (client, outbound) = Client::new(owner, 8);
            hub.register(client).unwrap();

            Self {
                publisher: TaskEventPublisher::new(Some(pool.clone()), Some(hub)),
                pool,
                store,
                outbound,
                _shutdown: shutdown,
            }
        }

        async fn written(&self) -> Vec<NotificationJob> {
            self.pool.stop().await;
            self.store.jobs.lock().clone()
        }
    }

    #[tokio::test]
    async fn test_created_enqueues_and_pushes_to_owner() {
        let mut fx = Fixture::new("42");

        fx.publisher
            .task_created(&task(7, "42", "write report", TaskStatus::Todo))
            .await;

        let event = next_event(&mut fx.outbound).await;
        assert_eq!(event["event"], "task_created");
        assert_eq!(event["task_id"], 7);
        assert_eq!(event["description"], "write report");

        assert_eq!(
            fx.written().await,
            vec![NotificationJob::new(7, "New task created: write report")]
        );
    }

    #[tokio::test]
    async fn test_update_notifies_only_when_done() {
        let mut fx = Fixture::new("42");

        fx.publisher
            .task_updated(&task(7, "42", "write report", TaskStatus::InProgress))
            .await;
        fx.publisher
            .task_updated(&task(7, "42", "write report", TaskStatus::Done))
            .await;

        assert_eq!(next_event(&mut fx.outbound).await["event"], "task_updated");
        assert_eq!(next_event(&mut fx.outbound).await["event"], "task_updated");

        assert_eq!(
            fx.written().await,
            vec![NotificationJob::new(7, "Task 'write report' marked as done.")]
        );
    }

    #[tokio::test]
    async fn test_deleted_pushes_without_notification() {
        let mut fx = Fixture::new("42");

        fx.publisher.task_deleted("42", 7);

        let event = next_event(&mut fx.outbound).await;
        assert_eq!(event["event"], "task_deleted");
        assert_eq!(event["task_id"], 7);
        assert_eq!(event["description"], "Task deleted");
        assert!(fx.written().await.is_empty());
    }

    #[tokio::test]
    async fn test_events_route_by_owner_not_task_id() {
        let mut fx = Fixture::new("42");

        // 任务 ID 与另一个用户 ID 相同，事件仍只投递给所有者
        fx.publisher
            .task_created(&task(42, "someone-else", "x", TaskStatus::Todo))
            .await;
        fx.publisher.task_deleted("42", 99);

        let event = next_event(&mut fx.outbound).await;
        assert_eq!(event["task_id"], 99);
    }

    #[tokio::test]
    async fn test_missing_pool_and_hub_are_noops() {
        let publisher = TaskEventPublisher::default();
        publisher
            .task_created(&task(1, "1", "x", TaskStatus::Todo))
            .await;
        publisher
            .task_updated(&task(1, "1", "x", TaskStatus::Done))
            .await;
        publisher.task_deleted("1", 1);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_fail_caller() {
        let store = Arc::new(RecordingStore::default());
        let pool = Arc::new(JobPool::new(
            store,
            NotificationPoolConfig {
                workers: 1,
                queue_capacity: 1,
                overflow_policy: OverflowPolicy::Reject,
            },
        ));
        let publisher = TaskEventPublisher::new(Some(pool.clone()), None);

        // 未启动 worker，第二次提交会被拒绝，但调用方不受影响
        publisher
            .task_created(&task(1, "1", "a", TaskStatus::Todo))
            .await;
        publisher
            .task_created(&task(2, "1", "b", TaskStatus::Todo))
            .await;
        assert_eq!(pool.dropped(), 0);
    }
}
