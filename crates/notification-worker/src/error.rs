//! 通知任务池错误类型

use tasktrack_shared::error::TaskError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("通知队列已满")]
    QueueFull,

    #[error("通知队列已关闭")]
    Closed,

    #[error("通知持久化失败: {0}")]
    Store(#[from] TaskError),
}

impl PoolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueueFull => "NOTIFICATION_QUEUE_FULL",
            Self::Closed => "NOTIFICATION_QUEUE_CLOSED",
            Self::Store(e) => e.code(),
        }
    }

    /// 存储暂时不可用时为 true，队列状态错误不可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}
