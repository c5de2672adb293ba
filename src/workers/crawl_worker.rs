// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::to_chrono;
use crate::domain::models::task::{
    CrawlPayload, DeadLetterReason, ParsePayload, Task, TaskKind,
};
use crate::domain::services::fetcher::{FetchedPage, Fetcher};
use crate::domain::services::rate_limiting_service::RateLimiter;
use crate::domain::services::recrawl_service::{RecrawlError, RecrawlScheduler};
use crate::queue::task_queue::{CommitOutcome, EnqueueOutcome, QueueError, QueueStore};
use crate::utils::retry_policy::RetryPolicy;
use crate::workers::runner::{Bounded, HandlerOutcome, TaskContext, TaskHandler};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 抓取任务处理逻辑
///
/// 准入 → 抓取 → 重新确认租约 → 写入派生任务与重爬记录 → 提交
pub struct CrawlHandler {
    limiter: Arc<dyn RateLimiter>,
    fetcher: Arc<dyn Fetcher>,
    recrawl: Option<Arc<RecrawlScheduler>>,
    retry_policy: RetryPolicy,
    max_depth: u32,
    limiter_error_delay: Duration,
}

impl CrawlHandler {
    /// 创建抓取处理逻辑
    ///
    /// # 参数
    ///
    /// * `limiter` - 域名限流器
    /// * `fetcher` - 抓取器
    /// * `recrawl` - 重爬调度器，未启用重爬时为 `None`
    /// * `retry_policy` - 暂时性失败的退避策略
    /// * `max_depth` - 链接发现的最大深度
    /// * `limiter_error_delay` - 限流器后端故障时的延后时长
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        fetcher: Arc<dyn Fetcher>,
        recrawl: Option<Arc<RecrawlScheduler>>,
        retry_policy: RetryPolicy,
        max_depth: u32,
        limiter_error_delay: Duration,
    ) -> Self {
        Self {
            limiter,
            fetcher,
            recrawl,
            retry_policy,
            max_depth,
            limiter_error_delay,
        }
    }

    fn retry(&self, task: &Task, ctx: &TaskContext<'_>, error: String) -> HandlerOutcome {
        let not_before = self
            .retry_policy
            .next_retry_time(task.attempt_count, ctx.clock.now());
        HandlerOutcome::Commit(CommitOutcome::Retry { not_before, error })
    }

    /// 把发现的链接放入 frontier
    async fn enqueue_links(
        &self,
        task: &Task,
        payload: &CrawlPayload,
        page: &FetchedPage,
        ctx: &TaskContext<'_>,
    ) -> Result<usize, QueueError> {
        if payload.depth >= self.max_depth {
            return Ok(0);
        }
        let child_payload = CrawlPayload {
            depth: payload.depth + 1,
            parent_id: Some(task.id),
            headers: payload.headers.clone(),
            ..Default::default()
        };

        let mut admitted = 0;
        for link in &page.links {
            if let Some(recrawl) = &self.recrawl {
                match recrawl.is_tracked(link).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(RecrawlError::Queue(e)) => return Err(e),
                    Err(e) => warn!(link = %link, "Failed to check recrawl record: {}", e),
                }
            }
            let child = match Task::crawl(link.clone(), &child_payload) {
                Ok(child) => child
                    .with_id(Task::id_for_url(link))
                    .with_priority(task.priority)
                    .with_max_attempts(task.max_attempts),
                Err(e) => {
                    debug!(link = %link, "Skipping link: {}", e);
                    continue;
                }
            };
            match ctx.queue.enqueue(child).await {
                Ok(EnqueueOutcome::Enqueued) => {
                    admitted += 1;
                    metrics::counter!("crawlq_tasks_enqueued_total", "queue" => "frontier")
                        .increment(1);
                }
                Ok(EnqueueOutcome::Duplicate) | Err(QueueError::DeadLettered(_)) => {}
                Err(e) if e.is_systemic() => return Err(e),
                Err(e) => warn!(link = %link, "Failed to enqueue link: {}", e),
            }
        }
        Ok(admitted)
    }

    /// 把页面内容放入 parse 队列
    ///
    /// 解析任务ID由抓取任务ID与内容哈希确定，重复提交同一结果不会产生重复任务
    async fn enqueue_parse(
        &self,
        task: &Task,
        page: &FetchedPage,
        ctx: &TaskContext<'_>,
    ) -> Result<(), QueueError> {
        let payload = ParsePayload {
            body: page.body.clone(),
            content_class: page.content_class,
            content_hash: page.content_hash.clone(),
            source_task_id: task.id,
        };
        let parse_task = match Task::parse(task.url.clone(), &payload) {
            Ok(t) => t
                .with_id(Uuid::new_v5(&task.id, page.content_hash.as_bytes()))
                .with_priority(task.priority)
                .with_max_attempts(task.max_attempts),
            Err(e) => {
                warn!("Failed to build parse task: {}", e);
                return Ok(());
            }
        };
        match ctx.queue.enqueue(parse_task).await {
            Ok(EnqueueOutcome::Enqueued) => {
                metrics::counter!("crawlq_tasks_enqueued_total", "queue" => "parse").increment(1);
                Ok(())
            }
            Ok(EnqueueOutcome::Duplicate) | Err(QueueError::DeadLettered(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn record_completion(&self, task: &Task, page: &FetchedPage) -> Result<(), QueueError> {
        let Some(recrawl) = &self.recrawl else {
            return Ok(());
        };
        let class = if page.not_modified {
            match recrawl.known_class(&task.url).await {
                Ok(known) => known.unwrap_or(page.content_class),
                Err(_) => page.content_class,
            }
        } else {
            page.content_class
        };
        match recrawl
            .record_completion(
                &task.url,
                &task.domain,
                class,
                &page.content_hash,
                page.validators.clone(),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(RecrawlError::Queue(e)) => Err(e),
            Err(e) => {
                warn!("Failed to record recrawl completion: {}", e);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl TaskHandler for CrawlHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Crawl
    }

    async fn handle(&self, task: &Task, ctx: &mut TaskContext<'_>) -> Result<HandlerOutcome, QueueError> {
        let payload = match task.payload.crawl() {
            Ok(payload) => payload,
            Err(e) => {
                return Ok(HandlerOutcome::Commit(CommitOutcome::DeadLetter {
                    reason: DeadLetterReason::Permanent,
                    error: e.to_string(),
                }))
            }
        };

        match self.limiter.admit(&task.domain).await {
            Ok(admission) if !admission.allowed => {
                let not_before = admission
                    .not_before
                    .unwrap_or_else(|| ctx.clock.now() + to_chrono(admission.retry_after));
                debug!(domain = %task.domain, "Rate limited, deferring until {}", not_before);
                return Ok(HandlerOutcome::Defer(not_before));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(domain = %task.domain, "Rate limiter unavailable: {}", e);
                return Ok(HandlerOutcome::Defer(
                    ctx.clock.now() + to_chrono(self.limiter_error_delay),
                ));
            }
        }

        let page = match ctx.bounded(self.fetcher.fetch(&task.url, &payload)).await {
            Bounded::Done(Ok(page)) => page,
            Bounded::Done(Err(e)) if e.is_permanent() => {
                info!("Permanent fetch failure: {}", e);
                return Ok(HandlerOutcome::Commit(CommitOutcome::DeadLetter {
                    reason: DeadLetterReason::Permanent,
                    error: e.to_string(),
                }));
            }
            Bounded::Done(Err(e)) => {
                debug!("Transient fetch failure: {}", e);
                return Ok(self.retry(task, ctx, e.to_string()));
            }
            Bounded::LeaseExpired => return Ok(HandlerOutcome::Abandon),
            Bounded::Shutdown => return Ok(HandlerOutcome::Release),
        };

        if !ctx.lease_still_valid().await? {
            return Ok(HandlerOutcome::Abandon);
        }

        let links = self.enqueue_links(task, &payload, &page, ctx).await?;
        if !page.not_modified {
            self.enqueue_parse(task, &page, ctx).await?;
        }
        self.record_completion(task, &page).await?;

        debug!(
            links,
            not_modified = page.not_modified,
            class = %page.content_class,
            "Crawl finished"
        );
        Ok(HandlerOutcome::Commit(CommitOutcome::Success))
    }
}
