//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理以及限流计数器所需的原子操作封装。

use crate::config::RedisConfig;
use crate::error::{Result, TaskError};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, instrument};

/// 固定窗口准入脚本
///
/// KEYS[1] = remaining 键，KEYS[2] = reset 键
/// ARGV[1] = 窗口配额，ARGV[2] = 窗口秒数，ARGV[3] = 新窗口的重置时间戳
///
/// 返回 {admitted, remaining, reset_at}。读取与扣减在同一脚本内执行，
/// 同一主体的并发请求不会读到相同的 remaining。
const ADMISSION_SCRIPT_SRC: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  local remaining = tonumber(ARGV[1]) - 1
  redis.call('SET', KEYS[1], remaining, 'EX', ARGV[2])
  redis.call('SET', KEYS[2], ARGV[3], 'EX', ARGV[2])
  return {1, remaining, tonumber(ARGV[3])}
end
local reset = tonumber(redis.call('GET', KEYS[2]) or ARGV[3])
if tonumber(current) <= 0 then
  return {0, 0, reset}
end
local remaining = redis.call('DECR', KEYS[1])
return {1, remaining, reset}
"#;

static ADMISSION_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(ADMISSION_SCRIPT_SRC));

/// 一次准入判定的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAdmission {
    /// 是否放行
    pub admitted: bool,
    /// 扣减后的剩余配额（拒绝时为 0）
    pub remaining: i64,
    /// 当前窗口重置时间（Unix 秒）
    pub reset_at: i64,
}

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 创建 Redis 客户端
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    /// 获取连接
    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(TaskError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(TaskError::from)
    }

    /// 读取整数值，键不存在时返回 None
    #[instrument(skip(self))]
    pub async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.get_conn().await?;
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    /// 查询剩余生存时间
    ///
    /// 键不存在或未设置过期时间时返回 None
    #[instrument(skip(self))]
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.get_conn().await?;
        // -2: 键不存在；-1: 无过期时间
        let secs: i64 = conn.ttl(key).await?;
        Ok((secs >= 0).then(|| Duration::from_secs(secs as u64)))
    }

    /// 在一个原子脚本内完成固定窗口的"检查并扣减"
    ///
    /// 窗口不存在时以 `limit - 1` 开启新窗口；剩余配额为 0 时拒绝且不再扣减。
    #[instrument(skip(self))]
    pub async fn acquire_window_slot(
        &self,
        remaining_key: &str,
        reset_key: &str,
        limit: i64,
        window: Duration,
        reset_at: i64,
    ) -> Result<WindowAdmission> {
        let mut conn = self.get_conn().await?;
        let (admitted, remaining, reset_at): (i64, i64, i64) = ADMISSION_SCRIPT
            .key(remaining_key)
            .key(reset_key)
            .arg(limit)
            .arg(window.as_secs().max(1))
            .arg(reset_at)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowAdmission {
            admitted: admitted == 1,
            remaining,
            reset_at,
        })
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    pub fn rate_limit(subject: &str) -> String {
        format!("rate_limit:{}", subject)
    }

    pub fn rate_limit_remaining(subject: &str) -> String {
        format!("{}:remaining", Self::rate_limit(subject))
    }

    pub fn rate_limit_reset(subject: &str) -> String {
        format!("{}:reset", Self::rate_limit(subject))
    }
}
