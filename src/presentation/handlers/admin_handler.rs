// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::rate_limit::DomainRateState;
use crate::domain::models::stats::QueueDepth;
use crate::domain::models::task::{QueueName, Task, TaskKind, TaskStatus};
use crate::domain::services::admin_service::{AdminService, AdminStats};
use crate::presentation::errors::AppError;
use crate::queue::task_queue::{Page, TaskFilter};
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// 任务列表查询参数
#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    pub queue: Option<String>,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub domain: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ListTasksQuery {
    fn filter(&self) -> Result<TaskFilter, AppError> {
        Ok(TaskFilter {
            queue: parse_opt::<QueueName>(self.queue.as_deref())?,
            status: parse_opt::<TaskStatus>(self.status.as_deref())?,
            kind: parse_opt::<TaskKind>(self.kind.as_deref())?,
            domain: self.domain.clone(),
        })
    }
}

fn parse_opt<T>(value: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| T::from_str(v).map_err(|e| AppError::bad_request(e.to_string())))
        .transpose()
}

/// 分页参数
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// 任务列表响应
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

impl TaskListResponse {
    fn new((tasks, total): (Vec<Task>, u64), page: Page) -> Self {
        Self {
            tasks,
            total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

/// 分页查询任务
///
/// 支持按队列、状态、任务类型与域名过滤
pub async fn list_tasks(
    Extension(admin): Extension<Arc<AdminService>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskListResponse>, AppError> {
    let filter = query.filter()?;
    let page = Page::new(query.limit, query.offset);
    let result = admin.list_tasks(&filter, page).await?;
    Ok(Json(TaskListResponse::new(result, page)))
}

/// 获取单个任务
pub async fn get_task(
    Extension(admin): Extension<Arc<AdminService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(admin.get_task(id).await?))
}

/// 聚合统计
pub async fn stats(
    Extension(admin): Extension<Arc<AdminService>>,
) -> Result<Json<AdminStats>, AppError> {
    Ok(Json(admin.stats().await?))
}

pub async fn queue_depths(
    Extension(admin): Extension<Arc<AdminService>>,
) -> Result<Json<Vec<QueueDepth>>, AppError> {
    Ok(Json(admin.queue_depths().await?))
}

/// 死信队列内容
pub async fn dead_letters(
    Extension(admin): Extension<Arc<AdminService>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<TaskListResponse>, AppError> {
    let page = Page::new(query.limit, query.offset);
    let result = admin.dead_letters(page).await?;
    Ok(Json(TaskListResponse::new(result, page)))
}

pub async fn rate_limits(
    Extension(admin): Extension<Arc<AdminService>>,
) -> Result<Json<Vec<DomainRateState>>, AppError> {
    Ok(Json(admin.rate_limits().await?))
}

/// 终止任务
///
/// # 返回值
///
/// 返回已移入死信队列的任务；已完成的任务返回 400
pub async fn terminate_task(
    Extension(admin): Extension<Arc<AdminService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(admin.terminate(id).await?))
}

/// 将死信任务重新入队
pub async fn requeue_task(
    Extension(admin): Extension<Arc<AdminService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(admin.requeue(id).await?))
}

/// 删除任务
pub async fn delete_task(
    Extension(admin): Extension<Arc<AdminService>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    admin.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
