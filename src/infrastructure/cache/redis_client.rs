// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use redis::aio::MultiplexedConnection;
use redis::RedisResult;

/// Redis客户端
///
/// 队列存储与分布式限流器共用同一个客户端，每次操作获取一个多路复用连接
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    key_prefix: String,
}

impl RedisClient {
    /// 创建新的Redis客户端实例
    ///
    /// # 参数
    ///
    /// * `redis_url` - Redis连接URL
    /// * `key_prefix` - 所有键的公共前缀
    ///
    /// # 返回值
    ///
    /// * `Ok(RedisClient)` - Redis客户端实例
    /// * `Err(RedisError)` - URL无效
    pub fn new(redis_url: &str, key_prefix: impl Into<String>) -> RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
        })
    }

    /// 获取多路复用连接
    pub async fn connection(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    /// 构建带前缀的键
    ///
    /// # 参数
    ///
    /// * `suffix` - 键后缀
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// 健康检查
    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
