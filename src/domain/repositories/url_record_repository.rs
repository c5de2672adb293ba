// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::recrawl::UrlRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use std::time::Duration;
use thiserror::Error;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 存储的数据无法解释
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// URL 重爬记录仓库特质
#[async_trait]
pub trait UrlRecordRepository: Send + Sync {
    /// 根据URL查找记录
    async fn find(&self, url: &str) -> Result<Option<UrlRecord>, RepositoryError>;

    /// 插入或更新记录
    async fn upsert(&self, record: &UrlRecord) -> Result<(), RepositoryError>;

    /// 查找到期需要重新入队的记录
    ///
    /// # 参数
    ///
    /// * `now` - 当前时间
    /// * `stuck_ceiling` - 已重新入队但长时间未完成的记录再次到期的时长
    /// * `limit` - 最多返回的记录数
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        stuck_ceiling: Duration,
        limit: u64,
    ) -> Result<Vec<UrlRecord>, RepositoryError>;

    /// 将记录标记为已重新入队
    ///
    /// 仅当记录的 `updated_at` 仍为 `observed` 时生效，多个进程同时扫描时只有一个会成功
    ///
    /// # 返回值
    ///
    /// * `Ok(true)` - 本次调用获得了该记录
    /// * `Ok(false)` - 记录已被其他调用方修改
    async fn claim_for_readmission(
        &self,
        url: &str,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// 记录总数
    async fn count(&self) -> Result<u64, RepositoryError>;
}
