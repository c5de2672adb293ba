// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::Lease;
use crate::domain::models::stats::{JobStats, QueueDepth};
use crate::domain::models::task::{DeadLetterReason, QueueName, Task, TaskKind, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// 队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 后端不可用或执行失败
    #[error("Queue store error: {0}")]
    Store(String),

    /// 任务无法序列化或反序列化
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 任务不存在
    #[error("Task not found: {0}")]
    NotFound(Uuid),

    /// 租约令牌与当前租约不一致（已被回收或重新分配）
    #[error("Lease lost for task {0}")]
    LeaseLost(Uuid),

    /// 租约已过期
    #[error("Lease expired for task {0}")]
    LeaseExpired(Uuid),

    /// 任务位于死信队列，需要管理员重新入队
    #[error("Task {0} is dead-lettered")]
    DeadLettered(Uuid),

    /// 当前状态不允许该操作
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl QueueError {
    /// 是否为系统性错误
    ///
    /// 系统性错误表示后端不可用，工作循环会退避并在多次失败后退出；
    /// 其他错误只影响单个任务
    pub fn is_systemic(&self) -> bool {
        matches!(self, QueueError::Store(_))
    }

    /// 是否表示调用方已失去租约
    pub fn is_lease_loss(&self) -> bool {
        matches!(self, QueueError::LeaseLost(_) | QueueError::LeaseExpired(_))
    }
}

impl From<sea_orm::DbErr> for QueueError {
    fn from(err: sea_orm::DbErr) -> Self {
        QueueError::Store(err.to_string())
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// 新任务已入队
    Enqueued,
    /// 任务已存在于某个非死信队列中，未做任何修改
    Duplicate,
}

/// 工作者提交的执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// 执行成功
    Success,
    /// 暂时性失败，`not_before` 之后重试
    Retry {
        not_before: DateTime<Utc>,
        error: String,
    },
    /// 永久性失败，直接进入死信队列
    DeadLetter {
        reason: DeadLetterReason,
        error: String,
    },
}

impl CommitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CommitOutcome::Success => "success",
            CommitOutcome::Retry { .. } => "retry",
            CommitOutcome::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// 提交后任务的实际去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// 任务已完成
    Completed,
    /// 任务进入重试队列
    Requeued { attempt_count: u32 },
    /// 任务进入死信队列（可能由重试耗尽强制转换）
    DeadLettered { reason: DeadLetterReason },
}

impl CommitResult {
    pub fn label(&self) -> &'static str {
        match self {
            CommitResult::Completed => "completed",
            CommitResult::Requeued { .. } => "requeued",
            CommitResult::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// 被回收的过期租约
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reclaimed {
    pub task_id: Uuid,
    pub attempt_count: u32,
    /// 回收时尝试次数耗尽，任务已进入死信队列
    pub dead_lettered: bool,
}

/// 任务过滤条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    pub queue: Option<QueueName>,
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
    pub domain: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.queue.map(|q| q == task.queue).unwrap_or(true)
            && self.status.map(|s| s == task.status).unwrap_or(true)
            && self.kind.map(|k| k == task.kind).unwrap_or(true)
            && self
                .domain
                .as_deref()
                .map(|d| d.eq_ignore_ascii_case(&task.domain))
                .unwrap_or(true)
    }
}

/// 分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl Page {
    pub const DEFAULT_LIMIT: u64 = 50;
    pub const MAX_LIMIT: u64 = 500;

    /// 创建分页参数，`limit` 被限制在 1 到 `MAX_LIMIT` 之间
    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// 队列存储特质
///
/// 所有状态转换都是原子的，并以租约令牌作为比较并交换的依据。
/// 调用方只依赖该契约，不依赖具体后端的语义。
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// 入队任务
    ///
    /// 对 `task.id` 幂等：任务已在任意非死信队列中时返回 `Duplicate`；
    /// 任务位于死信队列时返回 `QueueError::DeadLettered`；已完成的任务会被重新接纳
    async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome, QueueError>;

    /// 租用下一个可用任务
    ///
    /// 按优先级降序、入队时间升序选取，并返回新的租约
    ///
    /// # 参数
    ///
    /// * `queue` - 要租用的队列
    /// * `worker_id` - 工作者ID
    /// * `lease_duration` - 租约时长
    ///
    /// # 返回值
    ///
    /// * `Ok(Some((Task, Lease)))` - 成功租用
    /// * `Ok(None)` - 没有可租用的任务
    async fn lease_pop(
        &self,
        queue: QueueName,
        worker_id: Uuid,
        lease_duration: Duration,
    ) -> Result<Option<(Task, Lease)>, QueueError>;

    /// 提交执行结果
    ///
    /// 令牌不匹配返回 `LeaseLost`，租约过期返回 `LeaseExpired`
    async fn commit(&self, lease: &Lease, outcome: CommitOutcome)
        -> Result<CommitResult, QueueError>;

    /// 主动归还租约，任务立即可被重新租用且不计入尝试次数
    async fn release(&self, lease: &Lease) -> Result<(), QueueError>;

    /// 因容量限制归还租约，任务在 `not_before` 之后才可被租用，不计入尝试次数
    async fn defer(&self, lease: &Lease, not_before: DateTime<Utc>) -> Result<(), QueueError>;

    /// 续约，新的过期时间为当前时间加 `extension`
    async fn renew(&self, lease: &Lease, extension: Duration) -> Result<Lease, QueueError>;

    /// 租约是否仍为该任务当前有效的租约
    async fn check_lease(&self, lease: &Lease) -> Result<bool, QueueError>;

    /// 健康检查
    async fn ping(&self) -> Result<(), QueueError>;
}

/// 租约索引特质
///
/// 供清扫器查询并回收过期租约与卡住的任务
#[async_trait]
pub trait LeaseIndex: Send + Sync {
    /// 回收 `now` 之前已过期的租约
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<Reclaimed>, QueueError>;

    /// 将入队时间早于 `now - ceiling` 且仍持有租约的任务强制移入死信队列
    async fn dead_letter_stuck(
        &self,
        ceiling: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, QueueError>;
}

/// 队列管理特质
#[async_trait]
pub trait QueueAdmin: Send + Sync {
    /// 根据ID获取任务
    async fn get(&self, id: Uuid) -> Result<Option<Task>, QueueError>;

    /// 分页查询任务，返回当前页与总数
    async fn list(&self, filter: &TaskFilter, page: Page) -> Result<(Vec<Task>, u64), QueueError>;

    /// 聚合统计
    async fn stats(&self) -> Result<JobStats, QueueError>;

    /// 各队列深度
    async fn depths(&self) -> Result<Vec<QueueDepth>, QueueError>;

    /// 终止任务：移入死信队列并使当前租约令牌失效
    async fn terminate(&self, id: Uuid) -> Result<Task, QueueError>;

    /// 删除任务，不可恢复
    async fn delete(&self, id: Uuid) -> Result<(), QueueError>;

    /// 将死信任务移回起始队列并清零尝试次数
    async fn requeue(&self, id: Uuid) -> Result<Task, QueueError>;
}

/// 完整的队列后端
pub trait QueueBackend: QueueStore + LeaseIndex + QueueAdmin {}

impl<T: QueueStore + LeaseIndex + QueueAdmin + ?Sized> QueueBackend for T {}

#[async_trait]
impl<T: QueueStore + ?Sized> QueueStore for Arc<T> {
    async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome, QueueError> {
        (**self).enqueue(task).await
    }

    async fn lease_pop(
        &self,
        queue: QueueName,
        worker_id: Uuid,
        lease_duration: Duration,
    ) -> Result<Option<(Task, Lease)>, QueueError> {
        (**self).lease_pop(queue, worker_id, lease_duration).await
    }

    async fn commit(
        &self,
        lease: &Lease,
        outcome: CommitOutcome,
    ) -> Result<CommitResult, QueueError> {
        (**self).commit(lease, outcome).await
    }

    async fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        (**self).release(lease).await
    }

    async fn defer(&self, lease: &Lease, not_before: DateTime<Utc>) -> Result<(), QueueError> {
        (**self).defer(lease, not_before).await
    }

    async fn renew(&self, lease: &Lease, extension: Duration) -> Result<Lease, QueueError> {
        (**self).renew(lease, extension).await
    }

    async fn check_lease(&self, lease: &Lease) -> Result<bool, QueueError> {
        (**self).check_lease(lease).await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        (**self).ping().await
    }
}
