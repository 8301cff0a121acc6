//! 路由配置模块

use std::time::Duration;

use axum::{Router, http::HeaderValue, middleware, routing::get};
use tasktrack_shared::config::ServerConfig;
use tasktrack_shared::observability::middleware as obs_middleware;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{auth_middleware, rate_limit_middleware};
use crate::state::AppState;

/// 构建完整的应用路由
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .nest("/api", api_routes(state.clone(), server.request_timeout()))
        // WebSocket 自行校验查询参数中的 Token，不走认证与限流中间件
        .route("/ws", get(handlers::ws::ws_handler))
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .layer(cors_layer(&server.cors_origins))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

/// 需认证且受限流约束的 API
///
/// `route_layer` 后添加的在外层：先认证，再限流。
fn api_routes(state: AppState, timeout: Duration) -> Router<AppState> {
    Router::new()
        .route(
            "/rate-limit",
            get(handlers::rate_limit::get_rate_limit_status),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
        .layer(TimeoutLayer::new(timeout))
}

fn cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins.trim() == "*" {
        info!("CORS allowed_origins: * (all origins)");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    info!("CORS allowed_origins: {}", allowed_origins);
    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
