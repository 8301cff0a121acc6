//! 中间件模块
//!
//! 认证在外层、限流在内层：未认证请求不会消耗任何配额。

mod auth;
mod rate_limit;

pub use auth::{auth_middleware, extract_claims};
pub use rate_limit::{RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_HEADER, rate_limit_middleware};
