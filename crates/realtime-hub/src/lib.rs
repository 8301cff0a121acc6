//! 实时推送 Hub
//!
//! 单任务事件循环持有在线客户端注册表，按用户 ID 将事件扇出到各个 WebSocket 连接。
//! 所有注册表变更都经由 `HubHandle` 发送消息完成，循环之外没有共享可变状态。

pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod hub;

pub use client::{Client, ConnectionId};
pub use connection::serve_connection;
pub use error::HubError;
pub use event::{BroadcastEvent, TaskEventKind, TaskEventMessage};
pub use hub::{Hub, HubHandle};
