//! 通知任务池
//!
//! 任务变更后的通知持久化通过有界队列交给后台 worker 执行，
//! 请求路径只负责入队，不等待数据库写入。

pub mod error;
pub mod job;
pub mod pool;
pub mod store;

pub use error::PoolError;
pub use job::NotificationJob;
pub use pool::{JobPool, SubmitOutcome};
pub use store::{NotificationStore, PgNotificationStore};
