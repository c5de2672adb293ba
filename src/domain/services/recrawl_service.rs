// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::recrawl::{ContentClass, RecrawlPolicies, UrlRecord};
use crate::domain::models::task::{CrawlPayload, DomainError, Task, Validators};
use crate::domain::repositories::url_record_repository::{RepositoryError, UrlRecordRepository};
use crate::queue::task_queue::{EnqueueOutcome, QueueBackend, QueueError, QueueStore};
use crate::utils::clock::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 重爬错误类型
#[derive(Error, Debug)]
pub enum RecrawlError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl RecrawlError {
    /// 存储不可用（队列后端或记录数据库）
    pub fn is_systemic(&self) -> bool {
        match self {
            RecrawlError::Queue(e) => e.is_systemic(),
            RecrawlError::Repository(RepositoryError::Database(_)) => true,
            _ => false,
        }
    }
}

/// 重爬调度器
///
/// 在抓取完成时更新 URL 记录并计算下一次可重爬的时间，
/// 周期性地把到期的 URL 作为新的抓取任务重新放入 frontier。
pub struct RecrawlScheduler {
    repository: Arc<dyn UrlRecordRepository>,
    queue: Arc<dyn QueueBackend>,
    clock: Arc<dyn Clock>,
    policies: RecrawlPolicies,
    stuck_ceiling: Duration,
    max_attempts: u32,
}

impl RecrawlScheduler {
    /// 创建重爬调度器
    ///
    /// # 参数
    ///
    /// * `repository` - URL 记录仓库
    /// * `queue` - 队列后端
    /// * `clock` - 时钟
    /// * `policies` - 各内容分类的重爬策略
    /// * `stuck_ceiling` - 重新入队后长时间未完成的记录再次到期的时长
    /// * `max_attempts` - 重爬任务的最大尝试次数
    pub fn new(
        repository: Arc<dyn UrlRecordRepository>,
        queue: Arc<dyn QueueBackend>,
        clock: Arc<dyn Clock>,
        policies: RecrawlPolicies,
        stuck_ceiling: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            repository,
            queue,
            clock,
            policies,
            stuck_ceiling,
            max_attempts,
        }
    }

    /// 记录一次完成的抓取
    ///
    /// # 参数
    ///
    /// * `url` - 页面URL
    /// * `domain` - 域名
    /// * `class` - 内容分类
    /// * `content_hash` - 本次内容哈希
    /// * `validators` - 条件请求校验信息
    ///
    /// # 返回值
    ///
    /// 返回更新后的记录，其 `next_eligible_at` 已按策略计算
    pub async fn record_completion(
        &self,
        url: &str,
        domain: &str,
        class: ContentClass,
        content_hash: &str,
        validators: Validators,
    ) -> Result<UrlRecord, RecrawlError> {
        let now = self.clock.now();
        let existing = self.repository.find(url).await?;

        let interval = self.policies.next_interval(
            class,
            existing
                .as_ref()
                .filter(|r| r.crawl_count > 0)
                .map(|r| (r.content_class, r.current_interval(), r.last_hash.as_deref())),
            content_hash,
        );

        let mut record =
            existing.unwrap_or_else(|| UrlRecord::fresh(url, domain, class, now));
        let previous_interval = record.current_interval();
        record.complete(class, content_hash, validators, interval, now);
        self.repository.upsert(&record).await?;

        debug!(
            url = %url,
            class = %class,
            previous_secs = previous_interval.as_secs(),
            interval_secs = interval.as_secs(),
            "Recorded crawl completion"
        );
        Ok(record)
    }

    /// 当前到期的记录
    pub async fn due(&self, limit: u64) -> Result<Vec<UrlRecord>, RecrawlError> {
        let now = self.clock.now();
        Ok(self
            .repository
            .find_due(now, self.stuck_ceiling, limit)
            .await?)
    }

    /// 将到期的记录重新放入 frontier
    ///
    /// 每个记录先通过条件更新被认领，再以由URL确定的任务ID入队，
    /// 负载中携带上次的条件请求信息；同一URL仍在队列中时不会重复入队
    ///
    /// # 返回值
    ///
    /// 返回本次重新入队的任务数
    pub async fn readmit_due(&self, limit: u64) -> Result<usize, RecrawlError> {
        let due = self.due(limit).await?;
        let mut readmitted = 0;

        for record in due {
            let now = self.clock.now();
            if !self
                .repository
                .claim_for_readmission(&record.url, record.updated_at, now)
                .await?
            {
                debug!(url = %record.url, "Recrawl record claimed elsewhere");
                continue;
            }

            let payload = CrawlPayload {
                validators: record.validators.clone(),
                ..Default::default()
            };
            let task = Task::crawl(record.url.clone(), &payload)?
                .with_id(Task::id_for_url(&record.url))
                .with_max_attempts(self.max_attempts);

            match self.queue.enqueue(task).await {
                Ok(EnqueueOutcome::Enqueued) => {
                    readmitted += 1;
                    metrics::counter!("crawlq_recrawl_readmitted_total").increment(1);
                }
                Ok(EnqueueOutcome::Duplicate) => {
                    debug!(url = %record.url, "Recrawl task already queued");
                }
                Err(e) if e.is_systemic() => return Err(e.into()),
                Err(e) => {
                    warn!(url = %record.url, error = %e, "Failed to readmit url");
                }
            }
        }

        if readmitted > 0 {
            info!("Readmitted {} urls for recrawl", readmitted);
        }
        Ok(readmitted)
    }

    /// URL 是否已由重爬调度器跟踪
    ///
    /// 已跟踪的URL由重爬节奏决定何时再次抓取，链接发现时不再重复入队
    pub async fn is_tracked(&self, url: &str) -> Result<bool, RecrawlError> {
        Ok(self.repository.find(url).await?.is_some())
    }

    /// 已记录的内容分类，内容未变化（304）时沿用
    pub async fn known_class(&self, url: &str) -> Result<Option<ContentClass>, RecrawlError> {
        Ok(self.repository.find(url).await?.map(|r| r.content_class))
    }
}
