//! 任务服务 API 宿主
//!
//! 承载通知任务池、实时推送 Hub 与分布式限流三个组件，对外提供：
//!
//! - `GET /health`、`GET /ready`：存活与就绪探针
//! - `GET /ws?token=`：实时推送 WebSocket
//! - `GET /api/rate-limit`：当前用户的限流状态（需认证，受限流约束）
//!
//! 任务 CRUD 处理器通过 [`events::TaskEventPublisher`] 发布任务变更事件。

pub mod auth;
pub mod dto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod limiter;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, Result};
pub use events::{TaskEventPublisher, TaskSnapshot, TaskStatus};
pub use state::AppState;
