// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::RateLimitingSettings;
use crate::domain::models::rate_limit::{jitter_fraction, Admission, DomainRateState};
use crate::domain::services::rate_limiting_service::{RateLimitError, RateLimiter};
use crate::infrastructure::cache::redis_client::RedisClient;
use crate::utils::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use std::sync::Arc;
use tracing::debug;

/// 令牌桶脚本
///
/// 返回 `{allowed, blocked_until_millis}`。令牌不足时按 `ARGV[5]` 的抖动比例
/// 打开拒绝窗口，窗口结束前的请求都返回同一个截止时间
const TOKEN_BUCKET_SCRIPT: &str = r#"
    local key = KEYS[1]
    local capacity = tonumber(ARGV[1])
    local refill_rate = tonumber(ARGV[2])
    local now = tonumber(ARGV[3])
    local ttl = tonumber(ARGV[4])
    local jitter = tonumber(ARGV[5])

    local state = redis.call("HMGET", key, "tokens", "last_refill", "blocked_until")
    local blocked_until = tonumber(state[3]) or 0
    if blocked_until > now then
        return {0, blocked_until}
    end

    local tokens = tonumber(state[1]) or capacity
    local last_refill = tonumber(state[2]) or now

    if now > last_refill then
        tokens = math.min(capacity, tokens + (now - last_refill) / 1000 * refill_rate)
        last_refill = now
    end

    local allowed = 0
    blocked_until = 0
    if tokens >= 1 then
        tokens = tokens - 1
        allowed = 1
    else
        local wait = math.ceil((1 - tokens) / refill_rate * 1000 * (1 + jitter))
        blocked_until = now + wait
    end

    redis.call("HSET", key, "tokens", tostring(tokens), "last_refill", last_refill,
        "capacity", tostring(capacity), "refill_rate", tostring(refill_rate),
        "blocked_until", blocked_until)
    redis.call("EXPIRE", key, ttl)
    return {allowed, blocked_until}
"#;

/// 基于 Redis 的分布式令牌桶限流器
///
/// 多个进程共享同一组桶，每次准入是一次脚本调用
pub struct RedisRateLimiter {
    client: RedisClient,
    settings: RateLimitingSettings,
    clock: Arc<dyn Clock>,
    script: Script,
}

impl RedisRateLimiter {
    /// 创建分布式限流器
    ///
    /// # 参数
    ///
    /// * `client` - Redis客户端
    /// * `settings` - 限流配置
    /// * `clock` - 时钟
    pub fn new(client: RedisClient, settings: RateLimitingSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            settings,
            clock,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }

    fn bucket_key(&self, domain: &str) -> String {
        self.client.key(&format!("domain:{}", domain))
    }

    /// 空闲桶的过期时间：足够补满整个桶
    fn bucket_ttl(capacity: f64, rate: f64) -> u64 {
        ((capacity / rate).ceil() as u64).max(1) * 2
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn admit(&self, domain: &str) -> Result<Admission, RateLimitError> {
        let domain = domain.to_ascii_lowercase();
        let (capacity, rate) = self.settings.bucket_for(&domain);
        let mut conn = self.client.connection().await?;
        let now = self.clock.now();

        let (allowed, blocked_until_ms): (i64, i64) = self
            .script
            .key(self.bucket_key(&domain))
            .arg(capacity)
            .arg(rate)
            .arg(now.timestamp_millis())
            .arg(Self::bucket_ttl(capacity, rate))
            .arg(jitter_fraction(self.settings.jitter_factor()))
            .invoke_async(&mut conn)
            .await?;

        if allowed == 1 {
            return Ok(Admission::allowed());
        }
        let until = DateTime::<Utc>::from_timestamp_millis(blocked_until_ms).unwrap_or(now);
        let admission = Admission::denied_until(until, now);
        metrics::counter!("crawlq_rate_limit_denied_total").increment(1);
        debug!(
            domain = %domain,
            retry_after_ms = admission.retry_after.as_millis() as u64,
            "Domain rate limited"
        );
        Ok(admission)
    }

    async fn snapshot(&self) -> Result<Vec<DomainRateState>, RateLimitError> {
        let mut conn = self.client.connection().await?;
        let pattern = self.bucket_key("*");
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;

        let prefix = self.bucket_key("");
        let now = self.clock.now();
        let mut states = Vec::with_capacity(keys.len());
        for key in keys {
            let (tokens, last_refill, capacity, rate, blocked_until): (
                Option<f64>,
                Option<i64>,
                Option<f64>,
                Option<f64>,
                Option<i64>,
            ) = redis::cmd("HMGET")
                .arg(&key)
                .arg("tokens")
                .arg("last_refill")
                .arg("capacity")
                .arg("refill_rate")
                .arg("blocked_until")
                .query_async(&mut conn)
                .await?;
            let domain = key.strip_prefix(&prefix).unwrap_or(&key);
            let (default_capacity, default_rate) = self.settings.bucket_for(domain);
            let capacity = capacity.unwrap_or(default_capacity);
            let last_refill_at = last_refill
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or(now);

            let mut state = DomainRateState {
                domain: domain.to_string(),
                tokens: tokens.unwrap_or(capacity),
                capacity,
                refill_rate: rate.unwrap_or(default_rate),
                last_refill_at,
                jitter_factor: self.settings.jitter_factor(),
                blocked_until: blocked_until
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .filter(|until| *until > now),
            };
            state.refill(now);
            states.push(state);
        }
        Ok(states)
    }
}
