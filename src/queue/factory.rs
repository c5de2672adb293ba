// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::{QueueBackendKind, RateLimiterBackendKind, Settings};
use crate::domain::repositories::url_record_repository::UrlRecordRepository;
use crate::domain::services::rate_limiting_service::RateLimiter;
use crate::infrastructure::cache::redis_client::RedisClient;
use crate::infrastructure::database::connection::{create_pool, run_migrations};
use crate::infrastructure::queue::memory::MemoryQueueStore;
use crate::infrastructure::queue::redis::RedisQueueStore;
use crate::infrastructure::queue::sql::SqlQueueStore;
use crate::infrastructure::repositories::memory_url_record_repo::MemoryUrlRecordRepository;
use crate::infrastructure::repositories::url_record_repo_impl::SqlUrlRecordRepository;
use crate::infrastructure::services::local_rate_limiter::LocalRateLimiter;
use crate::infrastructure::services::redis_rate_limiter::RedisRateLimiter;
use crate::queue::task_queue::{QueueBackend, QueueStore};
use crate::utils::clock::Clock;
use anyhow::Context;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::info;

/// 按配置构建的存储与限流组件
#[derive(Clone)]
pub struct Backends {
    pub queue: Arc<dyn QueueBackend>,
    pub limiter: Arc<dyn RateLimiter>,
    pub url_records: Arc<dyn UrlRecordRepository>,
}

/// 根据配置选择队列后端、限流器与重爬记录仓库
///
/// SQL 与 Redis 队列后端都会把重爬记录保存在数据库中；内存后端全部保存在进程内
///
/// # 参数
///
/// * `settings` - 应用配置
/// * `clock` - 所有组件共用的时钟
///
/// # 返回值
///
/// * `Ok(Backends)` - 构建好的组件
/// * `Err(anyhow::Error)` - 连接或迁移失败
pub async fn build_backends(settings: &Settings, clock: Arc<dyn Clock>) -> anyhow::Result<Backends> {
    let needs_redis = settings.queue.backend == QueueBackendKind::Redis
        || settings.rate_limiting.backend == RateLimiterBackendKind::Redis;
    let redis = if needs_redis {
        Some(
            RedisClient::new(&settings.redis.url, settings.queue.key_prefix.clone())
                .context("invalid redis url")?,
        )
    } else {
        None
    };

    let db = if settings.queue.backend == QueueBackendKind::Memory {
        None
    } else {
        Some(connect_database(settings).await?)
    };

    let (queue, url_records): (Arc<dyn QueueBackend>, Arc<dyn UrlRecordRepository>) =
        match (settings.queue.backend, &db, &redis) {
            (QueueBackendKind::Sql, Some(db), _) => (
                Arc::new(SqlQueueStore::new(db.clone(), clock.clone())),
                Arc::new(SqlUrlRecordRepository::new(db.clone())),
            ),
            (QueueBackendKind::Redis, Some(db), Some(redis)) => (
                Arc::new(RedisQueueStore::new(redis.clone(), clock.clone())),
                Arc::new(SqlUrlRecordRepository::new(db.clone())),
            ),
            _ => (
                Arc::new(MemoryQueueStore::new(clock.clone())),
                Arc::new(MemoryUrlRecordRepository::new()),
            ),
        };

    let limiter: Arc<dyn RateLimiter> = match (settings.rate_limiting.backend, &redis) {
        (RateLimiterBackendKind::Redis, Some(redis)) => Arc::new(RedisRateLimiter::new(
            redis.clone(),
            settings.rate_limiting.clone(),
            clock.clone(),
        )),
        _ => Arc::new(LocalRateLimiter::new(
            settings.rate_limiting.clone(),
            clock.clone(),
        )),
    };

    queue.ping().await.context("queue backend health check failed")?;
    info!(
        queue = ?settings.queue.backend,
        rate_limiter = ?settings.rate_limiting.backend,
        "Backends initialized"
    );

    Ok(Backends {
        queue,
        limiter,
        url_records,
    })
}

async fn connect_database(settings: &Settings) -> anyhow::Result<Arc<DatabaseConnection>> {
    let db = create_pool(&settings.database)
        .await
        .context("failed to connect to database")?;
    run_migrations(&db).await.context("failed to run migrations")?;
    Ok(Arc::new(db))
}
