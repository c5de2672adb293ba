// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 与后端无关的状态转换规则
//!
//! 所有后端在处理重试提交与租约回收时都调用这里的函数，
//! 保证 `attempt_count` 永远不会超过 `max_attempts`。

use crate::domain::models::lease::Lease;
use crate::domain::models::task::{DeadLetterReason, QueueName, Task, TaskStatus};
use crate::queue::task_queue::{CommitOutcome, CommitResult, QueueError};
use chrono::{DateTime, Utc};

/// 失败后的去向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// 回到队列
    Requeue {
        queue: QueueName,
        attempt_count: u32,
        not_before: Option<DateTime<Utc>>,
    },
    /// 尝试次数耗尽，进入死信队列
    DeadLetter {
        attempt_count: u32,
        reason: DeadLetterReason,
    },
}

/// 递增尝试次数并判断是否耗尽
///
/// `max_attempts` 表示最多执行的次数，第 `max_attempts` 次失败后进入死信
fn bump_attempts(attempt_count: u32, max_attempts: u32) -> (u32, bool) {
    let next = attempt_count.saturating_add(1).min(max_attempts.max(1));
    (next, next >= max_attempts)
}

/// 工作者提交 `retry` 后的去向
///
/// 未耗尽时进入重试队列，`not_before` 之后才可再次被租用
pub fn after_retry(task: &Task, not_before: DateTime<Utc>) -> FailureDisposition {
    let (attempt_count, exhausted) = bump_attempts(task.attempt_count, task.max_attempts);
    if exhausted {
        FailureDisposition::DeadLetter {
            attempt_count,
            reason: DeadLetterReason::Exhausted,
        }
    } else {
        FailureDisposition::Requeue {
            queue: QueueName::Retry,
            attempt_count,
            not_before: Some(not_before),
        }
    }
}

/// 租约过期被回收后的去向
///
/// 未耗尽时立即回到起始队列
pub fn after_reclaim(task: &Task) -> FailureDisposition {
    let (attempt_count, exhausted) = bump_attempts(task.attempt_count, task.max_attempts);
    if exhausted {
        FailureDisposition::DeadLetter {
            attempt_count,
            reason: DeadLetterReason::Exhausted,
        }
    } else {
        FailureDisposition::Requeue {
            queue: task.origin(),
            attempt_count,
            not_before: None,
        }
    }
}

/// 将失败去向应用到任务上
pub fn apply_failure(task: &mut Task, disposition: &FailureDisposition, error: Option<String>, now: DateTime<Utc>) {
    task.clear_lease();
    if error.is_some() {
        task.last_error = error;
    }
    task.updated_at = now;
    match disposition {
        FailureDisposition::Requeue {
            queue,
            attempt_count,
            not_before,
        } => {
            task.queue = *queue;
            task.status = TaskStatus::Queued;
            task.attempt_count = *attempt_count;
            task.not_before = *not_before;
        }
        FailureDisposition::DeadLetter {
            attempt_count,
            reason,
        } => {
            task.attempt_count = *attempt_count;
            dead_letter(task, *reason, now);
        }
    }
}

/// 将任务移入死信队列并使当前租约失效
pub fn dead_letter(task: &mut Task, reason: DeadLetterReason, now: DateTime<Utc>) {
    task.clear_lease();
    task.queue = QueueName::DeadLetter;
    task.status = TaskStatus::DeadLettered;
    task.dead_letter_reason = Some(reason);
    task.not_before = None;
    task.updated_at = now;
}

/// 管理员重新入队：清零尝试次数并回到起始队列
pub fn requeue_from_dead_letter(task: &mut Task, now: DateTime<Utc>) {
    task.clear_lease();
    task.queue = task.origin();
    task.status = TaskStatus::Queued;
    task.attempt_count = 0;
    task.dead_letter_reason = None;
    task.not_before = None;
    task.enqueued_at = now;
    task.updated_at = now;
}

/// 租用请求是否可以取走该任务
///
/// 起始队列同时接收同类型在重试队列中已到期的任务，
/// 直接从重试队列租用时不区分类型
pub fn is_candidate(task: &Task, queue: QueueName, now: DateTime<Utc>) -> bool {
    if !task.is_ready_at(now) {
        return false;
    }
    match queue {
        QueueName::Retry => task.queue == QueueName::Retry,
        QueueName::DeadLetter => false,
        home => task.queue == home || (task.queue == QueueName::Retry && task.origin() == home),
    }
}

/// 校验租约是否为任务当前有效的租约
///
/// # 返回值
///
/// * `Err(QueueError::LeaseLost)` - 令牌不一致或任务已不在租用状态
/// * `Err(QueueError::LeaseExpired)` - 令牌一致但已过期
pub fn validate_lease(task: &Task, lease: &Lease, now: DateTime<Utc>) -> Result<(), QueueError> {
    if task.status != TaskStatus::Leased || task.lease_token != Some(lease.token) {
        return Err(QueueError::LeaseLost(task.id));
    }
    match task.lease_expires_at {
        Some(expires_at) if now < expires_at => Ok(()),
        _ => Err(QueueError::LeaseExpired(task.id)),
    }
}

/// 在已校验租约的任务上应用提交结果
pub fn apply_commit(task: &mut Task, outcome: CommitOutcome, now: DateTime<Utc>) -> CommitResult {
    match outcome {
        CommitOutcome::Success => {
            task.clear_lease();
            task.status = TaskStatus::Completed;
            task.not_before = None;
            task.updated_at = now;
            CommitResult::Completed
        }
        CommitOutcome::Retry { not_before, error } => {
            let disposition = after_retry(task, not_before);
            apply_failure(task, &disposition, Some(error), now);
            match disposition {
                FailureDisposition::Requeue { attempt_count, .. } => {
                    CommitResult::Requeued { attempt_count }
                }
                FailureDisposition::DeadLetter { reason, .. } => {
                    CommitResult::DeadLettered { reason }
                }
            }
        }
        CommitOutcome::DeadLetter { reason, error } => {
            task.last_error = Some(error);
            dead_letter(task, reason, now);
            CommitResult::DeadLettered { reason }
        }
    }
}

/// 将租约归还到队列，`not_before` 为空时立即可被租用
pub fn return_to_queue(task: &mut Task, not_before: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    task.clear_lease();
    task.status = TaskStatus::Queued;
    task.not_before = not_before;
    task.updated_at = now;
}

/// 准备入队的任务：放入起始队列并清除租约与死信信息
pub fn prepare_for_enqueue(mut task: Task, now: DateTime<Utc>) -> Task {
    task.clear_lease();
    task.queue = task.origin();
    task.status = TaskStatus::Queued;
    task.dead_letter_reason = None;
    task.attempt_count = task.attempt_count.min(task.max_attempts);
    task.enqueued_at = now;
    task.updated_at = now;
    task
}

/// 持有租约的任务是否超过绝对时间上限
///
/// 只针对已租用的任务；排队中的任务（包括因限流被推迟的）不会因等待而被判定为卡住
pub fn is_stuck(task: &Task, ceiling: chrono::Duration, now: DateTime<Utc>) -> bool {
    task.status == TaskStatus::Leased && now - task.enqueued_at >= ceiling
}
