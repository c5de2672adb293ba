// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// 重试退避策略
///
/// 失败任务在 `base_delay * 2^attempt_count` 之后重新可见，上限为 `max_delay`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 初始退避时间
    pub base_delay: Duration,
    /// 最大退避时间
    pub max_delay: Duration,
    /// 抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// 创建退避策略
    ///
    /// # 参数
    ///
    /// * `base_delay` - 初始退避时间
    /// * `max_delay` - 最大退避时间
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: 0.0,
        }
    }

    /// 设置抖动因子
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// 计算退避时间
    ///
    /// # 参数
    ///
    /// * `attempt_count` - 任务已失败的次数
    ///
    /// # 返回值
    ///
    /// 返回本次退避时长
    pub fn calculate_backoff(&self, attempt_count: u32) -> Duration {
        // 指数上限避免溢出
        let exponent = attempt_count.min(30) as i32;
        let backoff_secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let capped = backoff_secs.min(self.max_delay.as_secs_f64());

        let final_backoff = if self.jitter_factor > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter_factor;
            (capped + rand::random_range(0.0..jitter_range)).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(final_backoff)
    }

    /// 计算下次可被租用的时间
    pub fn next_retry_time(&self, attempt_count: u32, base_time: DateTime<Utc>) -> DateTime<Utc> {
        let backoff = self.calculate_backoff(attempt_count);
        base_time + chrono::Duration::milliseconds(backoff.as_millis() as i64)
    }
}
