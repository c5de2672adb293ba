// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 域名限流状态
///
/// 每个域名一个令牌桶，只由限流器在该域名的独占区内修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRateState {
    /// 域名
    pub domain: String,
    /// 当前令牌数
    pub tokens: f64,
    /// 桶容量（突发大小）
    pub capacity: f64,
    /// 每秒补充的令牌数
    pub refill_rate: f64,
    /// 上次补充时间
    pub last_refill_at: DateTime<Utc>,
    /// 抖动因子 (0.0-0.5)
    pub jitter_factor: f64,
    /// 当前拒绝窗口的结束时间，窗口内所有请求共享同一个截止时间
    #[serde(default)]
    pub blocked_until: Option<DateTime<Utc>>,
}

impl DomainRateState {
    /// 创建满桶状态
    pub fn new(
        domain: impl Into<String>,
        capacity: f64,
        refill_rate: f64,
        jitter_factor: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            domain: domain.into(),
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill_at: now,
            jitter_factor,
            blocked_until: None,
        }
    }

    /// 按经过的时间补充令牌
    pub fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_refill_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
            self.last_refill_at = now;
        }
    }

    /// 尝试取一个令牌
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 已扣减一个令牌
    /// * `Err(Duration)` - 令牌不足，返回不含抖动的等待时间 `(1 - tokens) / refill_rate`
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let wait = if self.refill_rate > 0.0 {
            (1.0 - self.tokens) / self.refill_rate
        } else {
            f64::MAX
        };
        Err(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
    }

    /// 准入一次请求
    ///
    /// 令牌不足时打开一个拒绝窗口，抖动只在打开窗口时抽取一次；
    /// 窗口结束前的请求一律被拒绝并得到相同的截止时间，
    /// 因此同一域名被推迟的任务会在同一时刻重新变为可租用
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 已扣减一个令牌
    /// * `Err(DateTime)` - 拒绝窗口的截止时间
    pub fn admit(&mut self, now: DateTime<Utc>) -> Result<(), DateTime<Utc>> {
        if let Some(until) = self.blocked_until {
            if until > now {
                return Err(until);
            }
            self.blocked_until = None;
        }
        match self.try_acquire(now) {
            Ok(()) => Ok(()),
            Err(wait) => {
                let wait = apply_jitter(wait, self.jitter_factor);
                let until = chrono::Duration::from_std(wait)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.blocked_until = Some(until);
                Err(until)
            }
        }
    }
}

/// 准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// 是否放行
    pub allowed: bool,
    /// 被拒绝时建议的等待时间（含抖动）
    pub retry_after: Duration,
    /// 被拒绝时该域名拒绝窗口的截止时间
    pub not_before: Option<DateTime<Utc>>,
}

impl Admission {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
            not_before: None,
        }
    }

    /// 拒绝，直到 `until` 之后再试
    pub fn denied_until(until: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            retry_after: (until - now).to_std().unwrap_or(Duration::ZERO),
            not_before: Some(until),
        }
    }
}

/// 抽取 `[0, jitter_factor)` 的随机比例
pub fn jitter_fraction(jitter_factor: f64) -> f64 {
    if jitter_factor <= 0.0 {
        return 0.0;
    }
    rand::random_range(0.0..jitter_factor)
}

/// 在基础等待时间上叠加 `[0, jitter_factor * base)` 的随机延迟
pub fn apply_jitter(base: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || base.is_zero() || base == Duration::MAX {
        return base;
    }
    let extra = jitter_fraction(jitter_factor) * base.as_secs_f64();
    base + Duration::from_secs_f64(extra)
}
