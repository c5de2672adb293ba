// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::Lease;
use crate::domain::models::task::{QueueName, Task, TaskKind};
use crate::queue::task_queue::{CommitOutcome, QueueBackend, QueueError, QueueStore};
use crate::utils::clock::Clock;
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 存储故障时的最长暂停时间
const MAX_STORE_BACKOFF: Duration = Duration::from_secs(30);

/// 任务处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// 提交执行结果
    Commit(CommitOutcome),
    /// 容量受限，`not_before` 之后再处理，不计入尝试次数
    Defer(DateTime<Utc>),
    /// 关闭中，归还租约
    Release,
    /// 租约已失效，不做任何提交，由清扫器回收
    Abandon,
}

/// 任务处理上下文
pub struct TaskContext<'a> {
    pub lease: &'a Lease,
    pub queue: &'a Arc<dyn QueueBackend>,
    pub clock: &'a Arc<dyn Clock>,
    pub shutdown: watch::Receiver<bool>,
}

/// 有界执行的结果
#[derive(Debug)]
pub enum Bounded<T> {
    Done(T),
    /// 在完成前租约到期
    LeaseExpired,
    /// 在完成前收到关闭信号
    Shutdown,
}

impl TaskContext<'_> {
    /// 在租约截止时间和关闭信号的约束下执行外部调用
    pub async fn bounded<F, T>(&mut self, fut: F) -> Bounded<T>
    where
        F: Future<Output = T> + Send,
    {
        let remaining = self.lease.remaining(self.clock.now());
        if remaining.is_zero() {
            return Bounded::LeaseExpired;
        }
        if *self.shutdown.borrow() {
            return Bounded::Shutdown;
        }
        tokio::select! {
            out = fut => Bounded::Done(out),
            _ = tokio::time::sleep(remaining) => Bounded::LeaseExpired,
            _ = self.shutdown.changed() => Bounded::Shutdown,
        }
    }

    /// 产生外部可见副作用之前重新确认租约仍然有效
    pub async fn lease_still_valid(&self) -> Result<bool, QueueError> {
        if !self.lease.is_valid_at(self.clock.now()) {
            return Ok(false);
        }
        self.queue.check_lease(self.lease).await
    }
}

/// 具体任务类型的执行逻辑
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 处理的任务类型
    fn kind(&self) -> TaskKind;

    /// 执行任务
    ///
    /// # 返回值
    ///
    /// * `Ok(HandlerOutcome)` - 任务级结果，交由工作循环提交
    /// * `Err(QueueError)` - 写入派生任务时的存储错误
    async fn handle(&self, task: &Task, ctx: &mut TaskContext<'_>) -> Result<HandlerOutcome, QueueError>;
}

/// 轮询工作循环配置
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub lease_duration: Duration,
    pub poll_interval: Duration,
    pub max_store_failures: u32,
}

/// 通用轮询工作循环
///
/// 租用 → 执行 → 提交；队列为空时休眠，存储故障时指数暂停，
/// 连续失败达到上限后以错误退出
pub struct PollingWorker<H: TaskHandler> {
    name: String,
    worker_id: Uuid,
    queue: Arc<dyn QueueBackend>,
    clock: Arc<dyn Clock>,
    handler: Arc<H>,
    settings: LoopSettings,
}

impl<H: TaskHandler> PollingWorker<H> {
    /// 创建工作循环
    ///
    /// # 参数
    ///
    /// * `name` - 工作器名称，用于日志与指标
    /// * `queue` - 队列后端
    /// * `clock` - 时钟
    /// * `handler` - 任务处理逻辑，多个循环可共享
    /// * `settings` - 循环配置
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn QueueBackend>,
        clock: Arc<dyn Clock>,
        handler: Arc<H>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            name: name.into(),
            worker_id: Uuid::new_v4(),
            queue,
            clock,
            handler,
            settings,
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    fn home_queue(&self) -> QueueName {
        self.handler.kind().home_queue()
    }

    /// 执行一次 租用-处理-提交
    ///
    /// # 返回值
    ///
    /// * `Ok(true)` - 处理了一个任务
    /// * `Ok(false)` - 队列为空
    pub async fn run_once(&self, shutdown: &watch::Receiver<bool>) -> Result<bool, QueueError> {
        let queue = self.home_queue();
        let Some((task, lease)) = self
            .queue
            .lease_pop(queue, self.worker_id, self.settings.lease_duration)
            .await?
        else {
            return Ok(false);
        };
        metrics::counter!("crawlq_tasks_leased_total", "queue" => queue.as_str()).increment(1);

        self.process(task, lease, shutdown.clone()).await?;
        Ok(true)
    }

    #[instrument(skip(self, task, lease, shutdown), fields(task_id = %task.id, url = %task.url, kind = %task.kind))]
    async fn process(
        &self,
        task: Task,
        lease: Lease,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), QueueError> {
        let started = Instant::now();
        let mut ctx = TaskContext {
            lease: &lease,
            queue: &self.queue,
            clock: &self.clock,
            shutdown,
        };

        let outcome = match self.handler.handle(&task, &mut ctx).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_systemic() => return Err(e),
            Err(e) => {
                warn!("Task handler failed: {}", e);
                HandlerOutcome::Commit(CommitOutcome::Retry {
                    not_before: self.clock.now(),
                    error: e.to_string(),
                })
            }
        };
        metrics::histogram!("crawlq_task_duration_seconds", "kind" => task.kind.as_str())
            .record(started.elapsed().as_secs_f64());

        let result = match outcome {
            HandlerOutcome::Commit(outcome) => {
                self.queue.commit(&lease, outcome).await.map(|result| {
                    metrics::counter!(
                        "crawlq_tasks_committed_total",
                        "kind" => task.kind.as_str(),
                        "result" => result.label()
                    )
                    .increment(1);
                    debug!(result = result.label(), "Task committed");
                })
            }
            HandlerOutcome::Defer(not_before) => self.queue.defer(&lease, not_before).await,
            HandlerOutcome::Release => self.queue.release(&lease).await,
            HandlerOutcome::Abandon => {
                info!("Lease no longer valid, abandoning task");
                Ok(())
            }
        };

        match result {
            Err(e) if e.is_lease_loss() => {
                metrics::counter!("crawlq_lease_lost_total").increment(1);
                warn!("Lease lost before commit: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    fn store_backoff(&self, failures: u32) -> Duration {
        let exp = failures.min(10);
        (self.settings.poll_interval * 2u32.pow(exp)).min(MAX_STORE_BACKOFF)
    }
}

/// 休眠指定时长，期间收到关闭信号则提前返回 `true`
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

#[async_trait]
impl<H: TaskHandler + 'static> Worker for PollingWorker<H> {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(worker = %self.name, worker_id = %self.worker_id, "Worker started");
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                info!(worker = %self.name, "Worker stopped");
                return Ok(());
            }

            match self.run_once(&shutdown).await {
                Ok(true) => failures = 0,
                Ok(false) => {
                    failures = 0;
                    sleep_or_shutdown(self.settings.poll_interval, &mut shutdown).await;
                }
                Err(e) if e.is_systemic() => {
                    failures += 1;
                    metrics::counter!("crawlq_store_errors_total", "worker" => self.name.clone())
                        .increment(1);
                    if failures >= self.settings.max_store_failures {
                        error!(worker = %self.name, "Queue store unavailable, exiting loop: {}", e);
                        return Err(WorkerError::TooManyStoreFailures {
                            failures,
                            last: e.to_string(),
                        });
                    }
                    let pause = self.store_backoff(failures);
                    warn!(worker = %self.name, failures, "Queue store error, pausing {:?}: {}", pause, e);
                    sleep_or_shutdown(pause, &mut shutdown).await;
                }
                Err(e) => {
                    warn!(worker = %self.name, "Task-level queue error: {}", e);
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
