//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum TaskError {
    // ==================== 存储错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 准入控制错误 ====================
    #[error("限流存储不可用: {0}")]
    RateLimitUnavailable(String),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, TaskError>;

impl TaskError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::RateLimitUnavailable(_) => "RATE_LIMIT_UNAVAILABLE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Redis(_) | Self::RateLimitUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = TaskError::RateLimitUnavailable("connection refused".to_string());
        assert_eq!(err.code(), "RATE_LIMIT_UNAVAILABLE");
        assert_eq!(err.to_string(), "限流存储不可用: connection refused");

        let err = TaskError::Validation("limit".to_string());
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_is_retryable() {
        let db_err = TaskError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let unavailable = TaskError::RateLimitUnavailable("connection refused".to_string());
        assert!(unavailable.is_retryable());

        assert!(!TaskError::Validation("bad".to_string()).is_retryable());
    }
}
