//! 通知持久化

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tasktrack_shared::database::Database;
use tasktrack_shared::error::TaskError;
use tracing::instrument;

use crate::error::PoolError;
use crate::job::NotificationJob;

/// 通知存储接口
///
/// 每个任务只调用一次 `insert_notification`，失败由调用方记录日志后丢弃。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(
        &self,
        job: &NotificationJob,
        created_at: DateTime<Utc>,
    ) -> Result<(), PoolError>;
}

/// PostgreSQL 实现
#[derive(Clone)]
pub struct PgNotificationStore {
    db: Database,
}

impl PgNotificationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    #[instrument(skip(self, job), fields(task_id = job.task_id))]
    async fn insert_notification(
        &self,
        job: &NotificationJob,
        created_at: DateTime<Utc>,
    ) -> Result<(), PoolError> {
        sqlx::query("INSERT INTO notifications (task_id, message, created_at) VALUES ($1, $2, $3)")
            .bind(job.task_id)
            .bind(&job.message)
            .bind(created_at)
            .execute(self.db.pool())
            .await
            .map_err(TaskError::from)?;
        Ok(())
    }
}
