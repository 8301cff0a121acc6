use serde::{Deserialize, Serialize};

/// 一条待持久化的通知
///
/// 由请求处理方创建，只会被一个 worker 消费一次。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub task_id: i64,
    pub message: String,
}

impl NotificationJob {
    pub fn new(task_id: i64, message: impl Into<String>) -> Self {
        Self {
            task_id,
            message: message.into(),
        }
    }
}
