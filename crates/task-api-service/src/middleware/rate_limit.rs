//! 限流中间件
//!
//! 位于认证中间件之内，按 JWT `sub` 做固定窗口限流：
//! - 放行：在响应上附加剩余配额与窗口重置时间
//! - 超限：429，剩余配额为 0，重置时间为当前窗口的重置时间
//! - 存储不可用：500，拒绝请求
//! - 缺少用户标识：401

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tasktrack_shared::observability::metrics;
use tracing::{error, warn};

use super::auth::extract_claims;
use crate::error::ApiError;
use crate::state::AppState;

pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-rate-limit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(subject) = extract_claims(&request).map(|c| c.sub.clone()) else {
        return ApiError::Unauthorized("缺少用户标识".to_string()).into_response();
    };

    let decision = match state.rate_limiter.check(&subject).await {
        Ok(decision) => decision,
        Err(e) => {
            error!(subject = %subject, error = %e, "限流检查失败，拒绝请求");
            metrics::record_rate_limit_decision("unavailable");
            return ApiError::from(e).into_response();
        }
    };

    if !decision.admitted {
        warn!(
            subject = %subject,
            path = %request.uri().path(),
            reset_at = decision.reset_at,
            "用户限流触发"
        );
        metrics::record_rate_limit_decision("rejected");
        let mut response = ApiError::RateLimitExceeded.into_response();
        apply_headers(&mut response, 0, decision.reset_at);
        return response;
    }

    metrics::record_rate_limit_decision("admitted");
    let mut response = next.run(request).await;
    apply_headers(&mut response, decision.remaining, decision.reset_at);
    response
}

fn apply_headers(response: &mut Response, remaining: i64, reset_at: i64) {
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining.max(0)));
    headers.insert(RATE_LIMIT_RESET_HEADER, HeaderValue::from(reset_at));
}
