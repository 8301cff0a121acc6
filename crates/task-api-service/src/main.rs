//! 任务服务 API 宿主
//!
//! 启动通知任务池、实时推送 Hub 与限流中间件，并在收到停止信号后按顺序关闭。

use std::sync::Arc;
use std::time::Duration;

use notification_worker::{JobPool, PgNotificationStore};
use realtime_hub::Hub;
use task_api_service::{
    auth::{JwtConfig, JwtManager},
    events::TaskEventPublisher,
    limiter::{RateLimiter, RedisCounterStore},
    routes,
    state::AppState,
};
use tasktrack_shared::{cache::Cache, config::AppConfig, database::Database, observability};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "task-api-service";

/// 等待任务池排空的上限，超时后通知 worker 放弃剩余任务
const POOL_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    config.validate()?;

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting {} on {}", SERVICE_NAME, config.server_addr());

    // JWT 密钥：生产环境必须通过 TASKTRACK_AUTH__JWT_SECRET 注入
    if config.auth.uses_default_secret() {
        if config.is_production() {
            anyhow::bail!("生产环境必须设置 TASKTRACK_AUTH__JWT_SECRET");
        }
        warn!("Using default JWT secret - set TASKTRACK_AUTH__JWT_SECRET for production");
    }

    let db = Database::connect(&config.database).await?;
    let cache = Arc::new(Cache::new(&config.redis)?);

    // 通知任务池
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = Arc::new(JobPool::new(
        Arc::new(PgNotificationStore::new(db.clone())),
        config.notification.clone(),
    ));
    pool.start(shutdown_rx);

    // 推送 Hub：进程内唯一实例，经 AppState 注入
    let (hub, hub_task) = Hub::spawn(&config.hub);

    let rate_limiter = RateLimiter::new(
        Arc::new(RedisCounterStore::new(cache.clone())),
        &config.rate_limit,
    );
    info!(
        limit = rate_limiter.limit(),
        window_secs = rate_limiter.window().as_secs(),
        "限流器已初始化"
    );

    let state = AppState::new(
        JwtManager::new(JwtConfig::from(&config.auth)),
        rate_limiter,
        hub.clone(),
        TaskEventPublisher::new(Some(pool.clone()), Some(hub.clone())),
        db.clone(),
        cache,
    );

    let app = routes::build_router(state, &config.server);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：停止接收新连接并等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 先停 Hub 断开所有推送连接，再排空通知任务
    hub.shutdown().await;
    if let Err(e) = hub_task.await {
        error!(error = %e, "推送 Hub 异常退出");
    }

    // 超时后发出取消信号，仍等待 worker 写完当前任务
    pool.stop_within(POOL_DRAIN_TIMEOUT, &shutdown_tx).await;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
