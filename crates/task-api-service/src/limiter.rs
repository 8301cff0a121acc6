//! 固定窗口限流器
//!
//! 计数存放在共享存储中，多实例部署时共用同一份配额。一次准入判定
//! 在存储侧原子完成，同一主体的并发请求不会超出配额。
//!
//! 每个主体的状态变化：无窗口 → 有余量 → 耗尽 → (过期) → 无窗口

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tasktrack_shared::cache::{Cache, CacheKey, WindowAdmission};
use tasktrack_shared::config::{MAX_RATE_LIMIT_WINDOW_SECS, RateLimitConfig};
use tasktrack_shared::error::{Result, TaskError};
use tokio::time::Instant;

use crate::dto::RateLimitStatus;

/// 限流计数存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// 原子地检查并扣减一次配额
    async fn acquire(&self, subject: &str, limit: i64, window: Duration)
    -> Result<WindowAdmission>;

    /// 当前窗口剩余配额，无窗口时返回 None
    async fn remaining(&self, subject: &str) -> Result<Option<i64>>;

    /// 当前窗口剩余时间，无窗口时返回 None
    async fn ttl(&self, subject: &str) -> Result<Option<Duration>>;
}

/// Redis 计数存储
pub struct RedisCounterStore {
    cache: Arc<Cache>,
}

impl RedisCounterStore {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn acquire(
        &self,
        subject: &str,
        limit: i64,
        window: Duration,
    ) -> Result<WindowAdmission> {
        let window = bounded(window);
        let reset_at = Utc::now().timestamp() + window.as_secs() as i64;
        self.cache
            .acquire_window_slot(
                &CacheKey::rate_limit_remaining(subject),
                &CacheKey::rate_limit_reset(subject),
                limit,
                window,
                reset_at,
            )
            .await
    }

    async fn remaining(&self, subject: &str) -> Result<Option<i64>> {
        self.cache
            .get_i64(&CacheKey::rate_limit_remaining(subject))
            .await
    }

    async fn ttl(&self, subject: &str) -> Result<Option<Duration>> {
        self.cache.ttl(&CacheKey::rate_limit_remaining(subject)).await
    }
}

struct MemoryWindow {
    remaining: i64,
    reset_at: i64,
    expires_at: Instant,
}

/// 进程内计数存储，用于单实例开发环境和测试
///
/// 过期判断基于 tokio 时钟，测试中可暂停并手动推进。
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, MemoryWindow>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的窗口数（含尚未清理的过期窗口）
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn acquire(
        &self,
        subject: &str,
        limit: i64,
        window: Duration,
    ) -> Result<WindowAdmission> {
        let window = bounded(window);
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if let Some(current) = windows
            .get_mut(subject)
            .filter(|current| current.expires_at > now)
        {
            if current.remaining <= 0 {
                return Ok(WindowAdmission {
                    admitted: false,
                    remaining: 0,
                    reset_at: current.reset_at,
                });
            }
            current.remaining -= 1;
            return Ok(WindowAdmission {
                admitted: true,
                remaining: current.remaining,
                reset_at: current.reset_at,
            });
        }

        // 开新窗口前清理所有已过期的主体，避免表无限增长
        windows.retain(|_, w| w.expires_at > now);

        let fresh = MemoryWindow {
            remaining: limit - 1,
            reset_at: Utc::now().timestamp() + window.as_secs() as i64,
            expires_at: now + window,
        };
        let admission = WindowAdmission {
            admitted: true,
            remaining: fresh.remaining,
            reset_at: fresh.reset_at,
        };
        windows.insert(subject.to_string(), fresh);
        Ok(admission)
    }

    async fn remaining(&self, subject: &str) -> Result<Option<i64>> {
        let now = Instant::now();
        Ok(self
            .windows
            .lock()
            .get(subject)
            .filter(|w| w.expires_at > now)
            .map(|w| w.remaining))
    }

    async fn ttl(&self, subject: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .windows
            .lock()
            .get(subject)
            .filter(|w| w.expires_at > now)
            .map(|w| w.expires_at - now))
    }
}

/// 限流器
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: i64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            limit: config.limit.max(1),
            window: config.window(),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 为一次请求做准入判定
    ///
    /// 存储访问失败时返回 `RateLimitUnavailable`，由调用方拒绝请求。
    pub async fn check(&self, subject: &str) -> Result<WindowAdmission> {
        self.store
            .acquire(subject, self.limit, self.window)
            .await
            .map_err(unavailable)
    }

    /// 查询主体的限流状态，不消耗配额
    pub async fn status(&self, subject: &str) -> Result<RateLimitStatus> {
        let remaining = self
            .store
            .remaining(subject)
            .await
            .map_err(unavailable)?
            .unwrap_or(self.limit)
            .clamp(0, self.limit);

        let reset = self
            .store
            .ttl(subject)
            .await
            .map_err(unavailable)?
            .map(|ttl| ttl.as_secs())
            .unwrap_or(0);

        Ok(RateLimitStatus { remaining, reset })
    }
}

fn bounded(window: Duration) -> Duration {
    window.clamp(
        Duration::from_secs(1),
        Duration::from_secs(MAX_RATE_LIMIT_WINDOW_SECS),
    )
}

fn unavailable(err: TaskError) -> TaskError {
    match err {
        TaskError::RateLimitUnavailable(_) => err,
        other => TaskError::RateLimitUnavailable(other.to_string()),
    }
}
