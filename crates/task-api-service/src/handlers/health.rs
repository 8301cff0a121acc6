//! 存活与就绪探针

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::state::AppState;

const SERVICE_NAME: &str = "task-api-service";

/// 存活探针：服务进程正常即返回 ok
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

/// 就绪探针：检查数据库、Redis 与推送 Hub
///
/// 任一依赖不可用时返回 503，负载均衡据此摘除实例。
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = state.database.health_check().await.is_ok();
    let cache_ok = state.cache.health_check().await.is_ok();
    let hub_ok = state.hub.is_running();
    let all_ok = db_ok && cache_ok && hub_ok;

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if all_ok { "ok" } else { "degraded" },
            "service": SERVICE_NAME,
            "checks": {
                "database": check(db_ok),
                "redis": check(cache_ok),
                "hub": check(hub_ok)
            },
            "online_clients": state.hub.online()
        })),
    )
}

fn check(ok: bool) -> &'static str {
    if ok { "ok" } else { "fail" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::MemoryCounterStore;
    use crate::state::test_support::test_state;
    use std::sync::Arc;
    use tasktrack_shared::config::RateLimitConfig;

    #[tokio::test]
    async fn test_health_check_is_ok() {
        let Json(body) = health_check().await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn test_readiness_reports_unreachable_dependencies() {
        let state = test_state(Arc::new(MemoryCounterStore::new()), RateLimitConfig::default());

        let (status, Json(body)) = readiness_check(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["database"], "fail");
        assert_eq!(body["checks"]["redis"], "fail");
        assert_eq!(body["checks"]["hub"], "ok");
    }

    #[tokio::test]
    async fn test_readiness_reports_stopped_hub() {
        let state = test_state(Arc::new(MemoryCounterStore::new()), RateLimitConfig::default());
        state.hub.shutdown().await;

        let (status, Json(body)) = readiness_check(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"]["hub"], "fail");
    }
}
