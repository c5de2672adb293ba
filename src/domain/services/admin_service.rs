// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::rate_limit::DomainRateState;
use crate::domain::models::stats::{JobStats, QueueDepth};
use crate::domain::models::task::{CrawlPayload, DomainError, QueueName, Task};
use crate::domain::services::rate_limiting_service::{RateLimitError, RateLimiter};
use crate::queue::task_queue::{
    EnqueueOutcome, Page, QueueAdmin, QueueBackend, QueueError, QueueStore, TaskFilter,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// 管理服务错误
#[derive(Error, Debug)]
pub enum AdminError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// 种子URL
#[derive(Debug, Clone, Default)]
pub struct Seed {
    pub url: String,
    pub priority: i32,
    pub headers: HashMap<String, String>,
}

/// 单个种子的入队结果
#[derive(Debug, Clone, Serialize)]
pub struct SeedResult {
    pub url: String,
    pub task_id: Option<Uuid>,
    /// enqueued / duplicate / rejected
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 管理界面使用的汇总信息
#[derive(Debug, Clone, Serialize)]
pub struct AdminStats {
    pub jobs: JobStats,
    pub queues: Vec<QueueDepth>,
    pub stuck: u64,
    pub dead_letter: u64,
}

/// 管理服务
///
/// 所有操作都通过队列存储的原子操作完成，可与工作者并发执行
pub struct AdminService {
    queue: Arc<dyn QueueBackend>,
    limiter: Arc<dyn RateLimiter>,
    default_max_attempts: u32,
}

impl AdminService {
    /// 创建管理服务
    ///
    /// # 参数
    ///
    /// * `queue` - 队列后端
    /// * `limiter` - 域名限流器
    /// * `default_max_attempts` - 种子任务的最大尝试次数
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        limiter: Arc<dyn RateLimiter>,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            queue,
            limiter,
            default_max_attempts,
        }
    }

    /// 将种子URL放入 frontier
    ///
    /// 种子任务ID由URL确定，重复提交同一URL不会产生重复任务；
    /// 无效URL被拒绝但不影响同批其他种子
    pub async fn admit_seeds(&self, seeds: Vec<Seed>) -> Result<Vec<SeedResult>, AdminError> {
        let mut results = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let payload = CrawlPayload {
                headers: seed.headers,
                ..Default::default()
            };
            let task = match Task::crawl(seed.url.clone(), &payload) {
                Ok(task) => task
                    .with_id(Task::id_for_url(&seed.url))
                    .with_priority(seed.priority)
                    .with_max_attempts(self.default_max_attempts),
                Err(e) => {
                    results.push(SeedResult {
                        url: seed.url,
                        task_id: None,
                        status: "rejected",
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            let task_id = task.id;
            let result = match self.queue.enqueue(task).await {
                Ok(EnqueueOutcome::Enqueued) => {
                    metrics::counter!("crawlq_tasks_enqueued_total", "queue" => "frontier")
                        .increment(1);
                    SeedResult {
                        url: seed.url,
                        task_id: Some(task_id),
                        status: "enqueued",
                        error: None,
                    }
                }
                Ok(EnqueueOutcome::Duplicate) => SeedResult {
                    url: seed.url,
                    task_id: Some(task_id),
                    status: "duplicate",
                    error: None,
                },
                Err(QueueError::DeadLettered(id)) => SeedResult {
                    url: seed.url,
                    task_id: Some(id),
                    status: "rejected",
                    error: Some("task is dead-lettered; requeue it instead".to_string()),
                },
                Err(e) => return Err(e.into()),
            };
            results.push(result);
        }

        info!(
            "Admitted {} seeds",
            results.iter().filter(|r| r.status == "enqueued").count()
        );
        Ok(results)
    }

    /// 分页查询任务
    pub async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: Page,
    ) -> Result<(Vec<Task>, u64), AdminError> {
        Ok(self.queue.list(filter, page).await?)
    }

    /// 获取单个任务
    pub async fn get_task(&self, id: Uuid) -> Result<Task, AdminError> {
        self.queue
            .get(id)
            .await?
            .ok_or(AdminError::Queue(QueueError::NotFound(id)))
    }

    /// 聚合统计与队列深度
    pub async fn stats(&self) -> Result<AdminStats, AdminError> {
        let jobs = self.queue.stats().await?;
        let queues = self.queue.depths().await?;
        let dead_letter = queues
            .iter()
            .find(|d| d.queue == QueueName::DeadLetter)
            .map(|d| d.total())
            .unwrap_or(0);
        Ok(AdminStats {
            stuck: jobs.stuck_total(),
            jobs,
            queues,
            dead_letter,
        })
    }

    /// 各队列深度
    pub async fn queue_depths(&self) -> Result<Vec<QueueDepth>, AdminError> {
        Ok(self.queue.depths().await?)
    }

    /// 死信队列内容
    pub async fn dead_letters(&self, page: Page) -> Result<(Vec<Task>, u64), AdminError> {
        let filter = TaskFilter {
            queue: Some(QueueName::DeadLetter),
            ..Default::default()
        };
        Ok(self.queue.list(&filter, page).await?)
    }

    /// 每个域名的限流状态
    pub async fn rate_limits(&self) -> Result<Vec<DomainRateState>, AdminError> {
        let mut states = self.limiter.snapshot().await?;
        states.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(states)
    }

    /// 终止任务
    ///
    /// 工作者会在下一次租约校验时发现租约已失效
    pub async fn terminate(&self, id: Uuid) -> Result<Task, AdminError> {
        let task = self.queue.terminate(id).await?;
        info!(task_id = %id, "Task terminated by operator");
        Ok(task)
    }

    /// 删除任务
    pub async fn delete(&self, id: Uuid) -> Result<(), AdminError> {
        self.queue.delete(id).await?;
        info!(task_id = %id, "Task deleted by operator");
        Ok(())
    }

    /// 将死信任务重新入队
    pub async fn requeue(&self, id: Uuid) -> Result<Task, AdminError> {
        let task = self.queue.requeue(id).await?;
        info!(task_id = %id, queue = %task.queue, "Task requeued by operator");
        Ok(task)
    }
}
