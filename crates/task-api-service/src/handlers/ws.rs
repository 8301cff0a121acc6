//! 实时推送 WebSocket 入口
//!
//! 浏览器无法在握手请求上设置 Authorization 头，Token 通过查询参数传入。
//! 身份在升级前校验，校验失败直接返回 401，不建立连接。

use axum::{
    extract::{
        Query, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use realtime_hub::serve_connection;
use serde::Deserialize;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws?token=
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return ApiError::Unauthorized("缺少认证 Token".to_string()).into_response();
    };

    let claims = match state.jwt_manager.verify_token(&token) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = state.hub.clone();
    upgrade.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let user_id = claims.sub;
        if let Err(e) = serve_connection(hub, user_id.clone(), sink, stream).await {
            warn!(user_id = %user_id, error = %e, "推送连接建立失败");
        }
    })
}
