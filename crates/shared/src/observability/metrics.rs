//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出，
//! 指标通过独立的 HTTP 端口暴露给 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标服务器句柄，Drop 时终止导出任务
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 安装 Prometheus recorder 并启动 `/metrics` 服务
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "notification_jobs_total",
        "Notification jobs processed by workers, labelled by status"
    );
    metrics::describe_counter!(
        "notification_jobs_dropped_total",
        "Notification jobs dropped because the queue was full"
    );
    metrics::describe_histogram!(
        "notification_job_duration_seconds",
        "Time spent persisting one notification"
    );

    metrics::describe_counter!(
        "hub_broadcasts_total",
        "Hub broadcast outcomes by label: delivered, no_subscriber, slow_consumer, disconnected, closed, mailbox_full"
    );
    metrics::describe_gauge!("hub_online_clients", "Currently registered push clients");

    metrics::describe_counter!(
        "rate_limit_decisions_total",
        "Rate limiter decisions (admitted, rejected, unavailable)"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    }))
}

/// 全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次通知持久化结果（success / failed）
#[inline]
pub fn record_notification_job(status: &'static str, duration_secs: f64) {
    metrics::counter!("notification_jobs_total", "status" => status).increment(1);
    metrics::histogram!("notification_job_duration_seconds").record(duration_secs);
}

/// 记录队列满导致的丢弃
#[inline]
pub fn record_notification_dropped() {
    metrics::counter!("notification_jobs_dropped_total").increment(1);
}

/// 记录一次广播投递结果
#[inline]
pub fn record_hub_broadcast(outcome: &'static str) {
    metrics::counter!("hub_broadcasts_total", "outcome" => outcome).increment(1);
}

/// 更新在线客户端数
#[inline]
pub fn set_hub_online(count: usize) {
    metrics::gauge!("hub_online_clients").set(count as f64);
}

/// 记录限流判定
#[inline]
pub fn record_rate_limit_decision(decision: &'static str) {
    metrics::counter!("rate_limit_decisions_total", "decision" => decision).increment(1);
}
