// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::{to_chrono, Lease};
use crate::domain::models::stats::{empty_depths, JobStats, QueueDepth};
use crate::domain::models::task::{
    DeadLetterReason, QueueName, Task, TaskKind, TaskPayload, TaskStatus,
};
use crate::infrastructure::database::entities::task as task_entity;
use crate::queue::rules::{self, FailureDisposition};
use crate::queue::task_queue::{
    CommitOutcome, CommitResult, EnqueueOutcome, LeaseIndex, Page, QueueAdmin, QueueError,
    QueueStore, Reclaimed, TaskFilter,
};
use crate::utils::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, LockBehavior, LockType},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
    UpdateMany,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// 单次扫描最多处理的过期租约 / 卡住任务数
const SWEEP_BATCH: u64 = 500;

/// SQL 队列存储
///
/// 四个逻辑队列共用 `tasks` 表。租用在事务中以 `FOR UPDATE SKIP LOCKED`
/// 选出候选行，再用 `status = 'queued'` 条件更新完成比较并交换；
/// 提交、释放、续约都是以 `(id, lease_token, lease_expires_at > now)` 为条件的更新。
#[derive(Clone)]
pub struct SqlQueueStore {
    db: Arc<DatabaseConnection>,
    clock: Arc<dyn Clock>,
}

impl SqlQueueStore {
    /// 创建 SQL 队列存储
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    /// * `clock` - 时钟
    pub fn new(db: Arc<DatabaseConnection>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    async fn find_task<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<Option<Task>, QueueError> {
        task_entity::Entity::find_by_id(id)
            .one(conn)
            .await?
            .map(Task::try_from)
            .transpose()
    }

    /// 在租约仍有效的条件下写入任务的新状态
    ///
    /// 条件不满足时重新读取任务以区分令牌不匹配与租约过期
    async fn write_under_lease(
        &self,
        lease: &Lease,
        task: &Task,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let result = write_state(task_entity::Entity::update_many(), task)
            .filter(task_entity::Column::Id.eq(lease.task_id))
            .filter(task_entity::Column::Status.eq(TaskStatus::Leased.as_str()))
            .filter(task_entity::Column::LeaseToken.eq(lease.token))
            .filter(task_entity::Column::LeaseExpiresAt.gt(now))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 1 {
            return Ok(());
        }
        match Self::find_task(self.db.as_ref(), lease.task_id).await? {
            Some(current) => {
                rules::validate_lease(&current, lease, now)?;
                Err(QueueError::LeaseLost(lease.task_id))
            }
            None => Err(QueueError::LeaseLost(lease.task_id)),
        }
    }

    /// 读取持有租约的任务并校验
    async fn load_leased(&self, lease: &Lease, now: DateTime<Utc>) -> Result<Task, QueueError> {
        let task = Self::find_task(self.db.as_ref(), lease.task_id)
            .await?
            .ok_or(QueueError::LeaseLost(lease.task_id))?;
        rules::validate_lease(&task, lease, now)?;
        Ok(task)
    }

    /// 以观察到的状态为条件写入，用于管理操作与清扫
    async fn write_if_unchanged(&self, observed: &Task, next: &Task) -> Result<bool, QueueError> {
        let mut update = write_state(task_entity::Entity::update_many(), next)
            .filter(task_entity::Column::Id.eq(observed.id))
            .filter(task_entity::Column::Status.eq(observed.status.as_str()))
            .filter(task_entity::Column::UpdatedAt.eq(observed.updated_at));
        update = match observed.lease_token {
            Some(token) => update.filter(task_entity::Column::LeaseToken.eq(token)),
            None => update.filter(task_entity::Column::LeaseToken.is_null()),
        };
        let result = update.exec(self.db.as_ref()).await?;
        Ok(result.rows_affected == 1)
    }

    fn queue_condition(queue: QueueName) -> Condition {
        match queue {
            QueueName::Retry => {
                Condition::all().add(task_entity::Column::Queue.eq(QueueName::Retry.as_str()))
            }
            home => {
                let mut any =
                    Condition::any().add(task_entity::Column::Queue.eq(home.as_str()));
                if let Some(kind) = home.home_kind() {
                    any = any.add(
                        Condition::all()
                            .add(task_entity::Column::Queue.eq(QueueName::Retry.as_str()))
                            .add(task_entity::Column::Kind.eq(kind.as_str())),
                    );
                }
                any
            }
        }
    }

    fn filter_condition(filter: &TaskFilter) -> Condition {
        let mut cond = Condition::all();
        if let Some(queue) = filter.queue {
            cond = cond.add(task_entity::Column::Queue.eq(queue.as_str()));
        }
        if let Some(status) = filter.status {
            cond = cond.add(task_entity::Column::Status.eq(status.as_str()));
        }
        if let Some(kind) = filter.kind {
            cond = cond.add(task_entity::Column::Kind.eq(kind.as_str()));
        }
        if let Some(domain) = &filter.domain {
            cond = cond.add(task_entity::Column::Domain.eq(domain.to_ascii_lowercase()));
        }
        cond
    }

    /// 反复读取并以条件更新写入，直到成功或操作不再适用
    async fn admin_transition<F>(&self, id: Uuid, mut transition: F) -> Result<Task, QueueError>
    where
        F: FnMut(&Task, DateTime<Utc>) -> Result<Option<Task>, QueueError> + Send,
    {
        loop {
            let now = self.clock.now();
            let observed = Self::find_task(self.db.as_ref(), id)
                .await?
                .ok_or(QueueError::NotFound(id))?;
            let Some(next) = transition(&observed, now)? else {
                return Ok(observed);
            };
            if self.write_if_unchanged(&observed, &next).await? {
                return Ok(next);
            }
            debug!(task_id = %id, "Concurrent update detected, retrying admin transition");
        }
    }
}

/// 设置任务的全部可变列
fn write_state(update: UpdateMany<task_entity::Entity>, task: &Task) -> UpdateMany<task_entity::Entity> {
    use task_entity::Column;
    update
        .col_expr(Column::Queue, Expr::value(task.queue.as_str()))
        .col_expr(Column::Status, Expr::value(task.status.as_str()))
        .col_expr(Column::AttemptCount, Expr::value(task.attempt_count as i32))
        .col_expr(Column::EnqueuedAt, Expr::value(task.enqueued_at))
        .col_expr(Column::NotBefore, Expr::value(task.not_before))
        .col_expr(
            Column::DeadLetterReason,
            Expr::value(task.dead_letter_reason.map(|r| r.as_str().to_string())),
        )
        .col_expr(Column::LastError, Expr::value(task.last_error.clone()))
        .col_expr(Column::LeaseToken, Expr::value(task.lease_token))
        .col_expr(Column::LeaseWorker, Expr::value(task.lease_worker))
        .col_expr(Column::LeaseAcquiredAt, Expr::value(task.lease_acquired_at))
        .col_expr(Column::LeaseExpiresAt, Expr::value(task.lease_expires_at))
        .col_expr(Column::UpdatedAt, Expr::value(task.updated_at))
}

impl TryFrom<task_entity::Model> for Task {
    type Error = QueueError;

    fn try_from(model: task_entity::Model) -> Result<Self, Self::Error> {
        let corrupt = |e: crate::domain::models::task::DomainError| {
            QueueError::Serialization(format!("task {}: {}", model.id, e))
        };
        let payload: TaskPayload = serde_json::from_value(model.payload.clone())?;
        Ok(Self {
            id: model.id,
            kind: model.kind.parse::<TaskKind>().map_err(corrupt)?,
            queue: model.queue.parse::<QueueName>().map_err(corrupt)?,
            status: model.status.parse::<TaskStatus>().map_err(corrupt)?,
            dead_letter_reason: model
                .dead_letter_reason
                .as_deref()
                .map(str::parse::<DeadLetterReason>)
                .transpose()
                .map_err(corrupt)?,
            url: model.url,
            domain: model.domain,
            priority: model.priority,
            attempt_count: model.attempt_count.max(0) as u32,
            max_attempts: model.max_attempts.max(1) as u32,
            enqueued_at: model.enqueued_at,
            payload,
            not_before: model.not_before,
            last_error: model.last_error,
            lease_token: model.lease_token,
            lease_worker: model.lease_worker,
            lease_acquired_at: model.lease_acquired_at,
            lease_expires_at: model.lease_expires_at,
            updated_at: model.updated_at,
        })
    }
}

impl TryFrom<&Task> for task_entity::ActiveModel {
    type Error = QueueError;

    fn try_from(task: &Task) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Set(task.id),
            kind: Set(task.kind.as_str().to_string()),
            url: Set(task.url.clone()),
            domain: Set(task.domain.clone()),
            priority: Set(task.priority),
            attempt_count: Set(task.attempt_count as i32),
            max_attempts: Set(task.max_attempts as i32),
            enqueued_at: Set(task.enqueued_at),
            payload: Set(serde_json::to_value(&task.payload)?),
            queue: Set(task.queue.as_str().to_string()),
            status: Set(task.status.as_str().to_string()),
            not_before: Set(task.not_before),
            dead_letter_reason: Set(task.dead_letter_reason.map(|r| r.as_str().to_string())),
            last_error: Set(task.last_error.clone()),
            lease_token: Set(task.lease_token),
            lease_worker: Set(task.lease_worker),
            lease_acquired_at: Set(task.lease_acquired_at),
            lease_expires_at: Set(task.lease_expires_at),
            updated_at: Set(task.updated_at),
        })
    }
}

#[async_trait]
impl QueueStore for SqlQueueStore {
    async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome, QueueError> {
        let now = self.clock.now();
        let prepared = rules::prepare_for_enqueue(task, now);

        if let Some(existing) = Self::find_task(self.db.as_ref(), prepared.id).await? {
            return match existing.status {
                TaskStatus::DeadLettered => Err(QueueError::DeadLettered(existing.id)),
                TaskStatus::Queued | TaskStatus::Leased => Ok(EnqueueOutcome::Duplicate),
                TaskStatus::Completed => {
                    let active = task_entity::ActiveModel::try_from(&prepared)?;
                    let result = task_entity::Entity::update_many()
                        .set(active)
                        .filter(task_entity::Column::Id.eq(prepared.id))
                        .filter(task_entity::Column::Status.eq(TaskStatus::Completed.as_str()))
                        .exec(self.db.as_ref())
                        .await?;
                    if result.rows_affected == 1 {
                        Ok(EnqueueOutcome::Enqueued)
                    } else {
                        Ok(EnqueueOutcome::Duplicate)
                    }
                }
            };
        }

        let active = task_entity::ActiveModel::try_from(&prepared)?;
        match active.insert(self.db.as_ref()).await {
            Ok(_) => Ok(EnqueueOutcome::Enqueued),
            Err(err) => match err.sql_err() {
                // 并发插入同一ID
                Some(SqlErr::UniqueConstraintViolation(_)) => Ok(EnqueueOutcome::Duplicate),
                _ => Err(err.into()),
            },
        }
    }

    async fn lease_pop(
        &self,
        queue: QueueName,
        worker_id: Uuid,
        lease_duration: Duration,
    ) -> Result<Option<(Task, Lease)>, QueueError> {
        if queue == QueueName::DeadLetter {
            return Err(QueueError::InvalidTransition(
                "dead_letter queue cannot be leased".to_string(),
            ));
        }

        loop {
            let now = self.clock.now();
            let txn = self.db.begin().await?;

            let candidate = task_entity::Entity::find()
                .filter(task_entity::Column::Status.eq(TaskStatus::Queued.as_str()))
                .filter(Self::queue_condition(queue))
                .filter(
                    Condition::any()
                        .add(task_entity::Column::NotBefore.is_null())
                        .add(task_entity::Column::NotBefore.lte(now)),
                )
                .order_by_desc(task_entity::Column::Priority)
                .order_by_asc(task_entity::Column::EnqueuedAt)
                .order_by_asc(task_entity::Column::Id)
                .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
                .one(&txn)
                .await?;

            let Some(model) = candidate else {
                txn.commit().await?;
                return Ok(None);
            };
            let mut task = Task::try_from(model)?;
            let observed_updated_at = task.updated_at;

            if task.is_exhausted() {
                rules::dead_letter(&mut task, DeadLetterReason::Exhausted, now);
                write_state(task_entity::Entity::update_many(), &task)
                    .filter(task_entity::Column::Id.eq(task.id))
                    .filter(task_entity::Column::Status.eq(TaskStatus::Queued.as_str()))
                    .exec(&txn)
                    .await?;
                txn.commit().await?;
                debug!(task_id = %task.id, "Exhausted task dead-lettered at lease time");
                continue;
            }

            let lease = Lease::grant(task.id, worker_id, now, lease_duration);
            task.set_lease(&lease);
            task.not_before = None;

            let result = write_state(task_entity::Entity::update_many(), &task)
                .filter(task_entity::Column::Id.eq(task.id))
                .filter(task_entity::Column::Status.eq(TaskStatus::Queued.as_str()))
                .filter(task_entity::Column::UpdatedAt.eq(observed_updated_at))
                .exec(&txn)
                .await?;
            txn.commit().await?;

            if result.rows_affected == 1 {
                return Ok(Some((task, lease)));
            }
            // 其他调用方已取走该任务
            debug!(task_id = %task.id, "Lost lease race, selecting next candidate");
        }
    }

    async fn commit(
        &self,
        lease: &Lease,
        outcome: CommitOutcome,
    ) -> Result<CommitResult, QueueError> {
        let now = self.clock.now();
        let mut task = self.load_leased(lease, now).await?;
        let result = rules::apply_commit(&mut task, outcome, now);
        self.write_under_lease(lease, &task, now).await?;
        Ok(result)
    }

    async fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut task = self.load_leased(lease, now).await?;
        rules::return_to_queue(&mut task, None, now);
        self.write_under_lease(lease, &task, now).await
    }

    async fn defer(&self, lease: &Lease, not_before: DateTime<Utc>) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut task = self.load_leased(lease, now).await?;
        rules::return_to_queue(&mut task, Some(not_before), now);
        self.write_under_lease(lease, &task, now).await
    }

    async fn renew(&self, lease: &Lease, extension: Duration) -> Result<Lease, QueueError> {
        let now = self.clock.now();
        let mut task = self.load_leased(lease, now).await?;
        let renewed = Lease {
            expires_at: now + to_chrono(extension),
            ..lease.clone()
        };
        task.lease_expires_at = Some(renewed.expires_at);
        task.updated_at = now;
        self.write_under_lease(lease, &task, now).await?;
        Ok(renewed)
    }

    async fn check_lease(&self, lease: &Lease) -> Result<bool, QueueError> {
        let now = self.clock.now();
        Ok(Self::find_task(self.db.as_ref(), lease.task_id)
            .await?
            .map(|task| task.holds_valid_lease(lease, now))
            .unwrap_or(false))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.db.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseIndex for SqlQueueStore {
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<Reclaimed>, QueueError> {
        let expired = task_entity::Entity::find()
            .filter(task_entity::Column::Status.eq(TaskStatus::Leased.as_str()))
            .filter(task_entity::Column::LeaseExpiresAt.lte(now))
            .order_by_asc(task_entity::Column::LeaseExpiresAt)
            .limit(SWEEP_BATCH)
            .all(self.db.as_ref())
            .await?;

        let mut reclaimed = Vec::with_capacity(expired.len());
        for model in expired {
            let observed = Task::try_from(model)?;
            let mut next = observed.clone();
            let disposition = rules::after_reclaim(&observed);
            rules::apply_failure(&mut next, &disposition, Some("lease expired".to_string()), now);

            if self.write_if_unchanged(&observed, &next).await? {
                reclaimed.push(Reclaimed {
                    task_id: next.id,
                    attempt_count: next.attempt_count,
                    dead_lettered: matches!(disposition, FailureDisposition::DeadLetter { .. }),
                });
            }
        }
        Ok(reclaimed)
    }

    async fn dead_letter_stuck(
        &self,
        ceiling: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, QueueError> {
        let threshold = now - to_chrono(ceiling);
        let stuck = task_entity::Entity::find()
            .filter(task_entity::Column::Status.eq(TaskStatus::Leased.as_str()))
            .filter(task_entity::Column::EnqueuedAt.lte(threshold))
            .order_by_asc(task_entity::Column::EnqueuedAt)
            .limit(SWEEP_BATCH)
            .all(self.db.as_ref())
            .await?;

        let mut moved = Vec::with_capacity(stuck.len());
        for model in stuck {
            let observed = Task::try_from(model)?;
            let mut next = observed.clone();
            rules::dead_letter(&mut next, DeadLetterReason::Stuck, now);
            if self.write_if_unchanged(&observed, &next).await? {
                moved.push(next.id);
            }
        }
        Ok(moved)
    }
}

#[async_trait]
impl QueueAdmin for SqlQueueStore {
    async fn get(&self, id: Uuid) -> Result<Option<Task>, QueueError> {
        Self::find_task(self.db.as_ref(), id).await
    }

    async fn list(&self, filter: &TaskFilter, page: Page) -> Result<(Vec<Task>, u64), QueueError> {
        let query = task_entity::Entity::find().filter(Self::filter_condition(filter));
        let total = query.clone().count(self.db.as_ref()).await?;
        let models = query
            .order_by_desc(task_entity::Column::Priority)
            .order_by_asc(task_entity::Column::EnqueuedAt)
            .order_by_asc(task_entity::Column::Id)
            .offset(page.offset)
            .limit(page.limit)
            .all(self.db.as_ref())
            .await?;

        let tasks = models
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((tasks, total))
    }

    async fn stats(&self) -> Result<JobStats, QueueError> {
        use task_entity::Column;
        let rows: Vec<(String, String, String, Option<String>, i64)> = task_entity::Entity::find()
            .select_only()
            .column(Column::Kind)
            .column(Column::Status)
            .column(Column::Queue)
            .column(Column::DeadLetterReason)
            .column_as(Expr::col(Column::Id).count(), "count")
            .group_by(Column::Kind)
            .group_by(Column::Status)
            .group_by(Column::Queue)
            .group_by(Column::DeadLetterReason)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let mut stats = JobStats::default();
        for (kind, status, queue, reason, count) in rows {
            let corrupt = |e: crate::domain::models::task::DomainError| {
                QueueError::Serialization(e.to_string())
            };
            stats.add(
                kind.parse().map_err(corrupt)?,
                status.parse().map_err(corrupt)?,
                queue.parse().map_err(corrupt)?,
                reason.as_deref().map(str::parse).transpose().map_err(corrupt)?,
                count.max(0) as u64,
            );
        }
        Ok(stats)
    }

    async fn depths(&self) -> Result<Vec<QueueDepth>, QueueError> {
        use task_entity::Column;
        let now = self.clock.now();

        let rows: Vec<(String, String, i64)> = task_entity::Entity::find()
            .select_only()
            .column(Column::Queue)
            .column(Column::Status)
            .column_as(Expr::col(Column::Id).count(), "count")
            .filter(Column::Status.ne(TaskStatus::Completed.as_str()))
            .group_by(Column::Queue)
            .group_by(Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let delayed: Vec<(String, i64)> = task_entity::Entity::find()
            .select_only()
            .column(Column::Queue)
            .column_as(Expr::col(Column::Id).count(), "count")
            .filter(Column::Status.eq(TaskStatus::Queued.as_str()))
            .filter(Column::NotBefore.gt(now))
            .group_by(Column::Queue)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let mut depths = empty_depths();
        for (queue, status, count) in rows {
            let (Ok(queue), Ok(status)) = (queue.parse::<QueueName>(), status.parse::<TaskStatus>())
            else {
                continue;
            };
            if let Some(depth) = depths.iter_mut().find(|d| d.queue == queue) {
                match status {
                    TaskStatus::Leased => depth.leased += count.max(0) as u64,
                    TaskStatus::Queued | TaskStatus::DeadLettered => {
                        depth.ready += count.max(0) as u64
                    }
                    TaskStatus::Completed => {}
                }
            }
        }
        for (queue, count) in delayed {
            let Ok(queue) = queue.parse::<QueueName>() else {
                continue;
            };
            if let Some(depth) = depths.iter_mut().find(|d| d.queue == queue) {
                let count = count.max(0) as u64;
                depth.ready = depth.ready.saturating_sub(count);
                depth.delayed += count;
            }
        }
        Ok(depths)
    }

    async fn terminate(&self, id: Uuid) -> Result<Task, QueueError> {
        self.admin_transition(id, |task, now| match task.status {
            TaskStatus::Completed => Err(QueueError::InvalidTransition(format!(
                "task {} is already completed",
                id
            ))),
            TaskStatus::DeadLettered => Ok(None),
            TaskStatus::Queued | TaskStatus::Leased => {
                let mut next = task.clone();
                rules::dead_letter(&mut next, DeadLetterReason::Terminated, now);
                Ok(Some(next))
            }
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<(), QueueError> {
        let result = task_entity::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    async fn requeue(&self, id: Uuid) -> Result<Task, QueueError> {
        self.admin_transition(id, |task, now| {
            if task.status != TaskStatus::DeadLettered {
                return Err(QueueError::InvalidTransition(format!(
                    "task {} is {}, only dead-lettered tasks can be requeued",
                    id, task.status
                )));
            }
            let mut next = task.clone();
            rules::requeue_from_dead_letter(&mut next, now);
            Ok(Some(next))
        })
        .await
    }
}
