//! 统一可观测性模块
//!
//! 提供日志与 Prometheus 指标的统一初始化。所有服务通过 `init` 一个入口完成配置，
//! 保证日志格式和指标命名一致。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

pub use crate::config::ObservabilityConfig;

/// 可观测性资源守卫
///
/// 持有指标服务器任务的句柄，Drop 时停止导出。
pub struct ObservabilityGuard {
    metrics_handle: Option<metrics::MetricsHandle>,
}

impl ObservabilityGuard {
    /// 空守卫（测试或禁用指标时使用）
    pub fn empty() -> Self {
        Self {
            metrics_handle: None,
        }
    }

    /// 指标导出是否处于运行状态
    pub fn metrics_running(&self) -> bool {
        self.metrics_handle.is_some()
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if self.metrics_handle.take().is_some() {
            info!("Shutting down observability...");
        }
    }
}

/// 统一初始化可观测性
///
/// 先初始化日志订阅器，再按配置启动 Prometheus 指标导出。
///
/// ```ignore
/// let config = AppConfig::load("task-api-service")?;
/// let _guard = observability::init(&config.observability).await?;
/// ```
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    info!(
        service = %config.service_name,
        log_format = %config.log_format,
        metrics_enabled = config.metrics_enabled,
        metrics_port = config.metrics_port,
        "Observability initialized"
    );

    if !config.metrics_enabled {
        return Ok(ObservabilityGuard::empty());
    }

    let metrics_handle = metrics::init(config).await?;
    Ok(ObservabilityGuard {
        metrics_handle: Some(metrics_handle),
    })
}
