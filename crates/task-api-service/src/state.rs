//! 应用状态

use std::sync::Arc;

use realtime_hub::HubHandle;
use tasktrack_shared::cache::Cache;
use tasktrack_shared::database::Database;

use crate::auth::JwtManager;
use crate::events::TaskEventPublisher;
use crate::limiter::RateLimiter;

/// Axum 共享状态
///
/// Hub 句柄在 main 中创建后注入，进程内没有全局 Hub。
#[derive(Clone)]
pub struct AppState {
    pub jwt_manager: Arc<JwtManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub hub: HubHandle,
    /// 供任务 CRUD 处理器发布变更事件
    pub events: TaskEventPublisher,
    pub database: Database,
    pub cache: Arc<Cache>,
}

impl AppState {
    pub fn new(
        jwt_manager: JwtManager,
        rate_limiter: RateLimiter,
        hub: HubHandle,
        events: TaskEventPublisher,
        database: Database,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            jwt_manager: Arc::new(jwt_manager),
            rate_limiter: Arc::new(rate_limiter),
            hub,
            events,
            database,
            cache,
        }
    }
}
