//! 限流状态查询

use axum::{Extension, Json, extract::State};

use crate::auth::Claims;
use crate::dto::{ApiResponse, RateLimitStatus};
use crate::error::Result;
use crate::state::AppState;

/// 查询当前用户的剩余配额与窗口重置秒数
///
/// GET /api/rate-limit
pub async fn get_rate_limit_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<RateLimitStatus>>> {
    let status = state.rate_limiter.status(&claims.sub).await?;
    Ok(Json(ApiResponse::success(status)))
}
