//! 推送事件

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 待投递的广播事件
///
/// `routing_key` 为订阅者的用户 ID，`payload` 为已序列化的消息体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEvent {
    pub routing_key: String,
    pub payload: Bytes,
}

impl BroadcastEvent {
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }
}

/// 任务事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
}

/// 推送给客户端的任务事件消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEventMessage {
    pub event: TaskEventKind,
    pub task_id: i64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskEventMessage {
    pub fn new(event: TaskEventKind, task_id: i64, description: impl Into<String>) -> Self {
        Self {
            event,
            task_id,
            description: description.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// 序列化并按用户 ID 生成广播事件
    pub fn into_broadcast(
        self,
        routing_key: impl Into<String>,
    ) -> Result<BroadcastEvent, serde_json::Error> {
        Ok(BroadcastEvent::new(routing_key, self.to_bytes()?))
    }
}
