// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::rate_limit::{Admission, DomainRateState};
use async_trait::async_trait;
use thiserror::Error;

/// 限流错误类型
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// 限流后端错误
    #[error("Rate limiter backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::Backend(err.to_string())
    }
}

/// 域名限流器特质
///
/// 每个域名的状态相互独立，一个域名被限流不会影响其他域名的准入
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 请求访问某个域名
    ///
    /// # 参数
    ///
    /// * `domain` - 域名
    ///
    /// # 返回值
    ///
    /// * `Ok(Admission)` - 准入结果，被拒绝时带有建议等待时间
    /// * `Err(RateLimitError)` - 后端错误
    async fn admit(&self, domain: &str) -> Result<Admission, RateLimitError>;

    /// 当前所有已知域名的限流状态
    async fn snapshot(&self) -> Result<Vec<DomainRateState>, RateLimitError>;
}
