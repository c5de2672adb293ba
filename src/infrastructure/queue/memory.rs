// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::{to_chrono, Lease};
use crate::domain::models::stats::{empty_depths, JobStats, QueueDepth};
use crate::domain::models::task::{DeadLetterReason, QueueName, Task, TaskStatus};
use crate::queue::rules::{self, FailureDisposition};
use crate::queue::task_queue::{
    CommitOutcome, CommitResult, EnqueueOutcome, LeaseIndex, Page, QueueAdmin, QueueError,
    QueueStore, Reclaimed, TaskFilter,
};
use crate::utils::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// 存储条目
#[derive(Debug, Clone)]
struct StoredTask {
    task: Task,
    /// 入队序号，同优先级内保证先进先出
    seq: u64,
}

type OrderKey = (Reverse<i32>, DateTime<Utc>, u64);

impl StoredTask {
    fn order_key(&self) -> OrderKey {
        (Reverse(self.task.priority), self.task.enqueued_at, self.seq)
    }
}

/// 内存队列存储
///
/// 条目按任务ID分片存放在 `DashMap` 中，不存在覆盖整个存储的锁。
/// 租用时先扫描出最佳候选，再在该条目上重新校验并修改；
/// 校验失败说明被并发调用方抢先，重新扫描即可。
pub struct MemoryQueueStore {
    entries: DashMap<Uuid, StoredTask>,
    seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl MemoryQueueStore {
    /// 创建内存队列存储
    ///
    /// # 参数
    ///
    /// * `clock` - 时钟
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            seq: AtomicU64::new(0),
            clock,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn best_candidate(&self, queue: QueueName, now: DateTime<Utc>) -> Option<Uuid> {
        self.entries
            .iter()
            .filter(|e| rules::is_candidate(&e.task, queue, now))
            .min_by_key(|e| e.order_key())
            .map(|e| *e.key())
    }

    /// 在持有条目写锁的情况下校验租约并执行修改
    fn with_valid_lease<T>(
        &self,
        lease: &Lease,
        f: impl FnOnce(&mut Task, DateTime<Utc>) -> T,
    ) -> Result<T, QueueError> {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .get_mut(&lease.task_id)
            .ok_or(QueueError::LeaseLost(lease.task_id))?;
        rules::validate_lease(&entry.task, lease, now)?;
        Ok(f(&mut entry.task, now))
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome, QueueError> {
        let now = self.clock.now();
        let seq = self.next_seq();
        match self.entries.entry(task.id) {
            Entry::Occupied(mut occupied) => match occupied.get().task.status {
                TaskStatus::DeadLettered => Err(QueueError::DeadLettered(task.id)),
                TaskStatus::Completed => {
                    occupied.insert(StoredTask {
                        task: rules::prepare_for_enqueue(task, now),
                        seq,
                    });
                    Ok(EnqueueOutcome::Enqueued)
                }
                TaskStatus::Queued | TaskStatus::Leased => Ok(EnqueueOutcome::Duplicate),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(StoredTask {
                    task: rules::prepare_for_enqueue(task, now),
                    seq,
                });
                Ok(EnqueueOutcome::Enqueued)
            }
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
            let Some(id) = self.best_candidate(queue, now) else {
                return Ok(None);
            };

            let Some(mut entry) = self.entries.get_mut(&id) else {
                continue;
            };
            // 扫描与加锁之间可能已被其他调用方取走
            if !rules::is_candidate(&entry.task, queue, now) {
                continue;
            }
            if entry.task.is_exhausted() {
                rules::dead_letter(&mut entry.task, DeadLetterReason::Exhausted, now);
                debug!(task_id = %id, "Exhausted task dead-lettered at lease time");
                continue;
            }

            let lease = Lease::grant(id, worker_id, now, lease_duration);
            entry.task.set_lease(&lease);
            entry.task.not_before = None;
            return Ok(Some((entry.task.clone(), lease)));
        }
    }

    async fn commit(
        &self,
        lease: &Lease,
        outcome: CommitOutcome,
    ) -> Result<CommitResult, QueueError> {
        self.with_valid_lease(lease, |task, now| rules::apply_commit(task, outcome, now))
    }

    async fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        self.with_valid_lease(lease, |task, now| rules::return_to_queue(task, None, now))
    }

    async fn defer(&self, lease: &Lease, not_before: DateTime<Utc>) -> Result<(), QueueError> {
        self.with_valid_lease(lease, |task, now| {
            rules::return_to_queue(task, Some(not_before), now)
        })
    }

    async fn renew(&self, lease: &Lease, extension: Duration) -> Result<Lease, QueueError> {
        self.with_valid_lease(lease, |task, now| {
            let renewed = Lease {
                expires_at: now + to_chrono(extension),
                ..lease.clone()
            };
            task.lease_expires_at = Some(renewed.expires_at);
            task.updated_at = now;
            renewed
        })
    }

    async fn check_lease(&self, lease: &Lease) -> Result<bool, QueueError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(&lease.task_id)
            .map(|e| e.task.holds_valid_lease(lease, now))
            .unwrap_or(false))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[async_trait]
impl LeaseIndex for MemoryQueueStore {
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<Reclaimed>, QueueError> {
        let expired: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|e| {
                e.task.status == TaskStatus::Leased
                    && e.task.lease_expires_at.map(|exp| exp <= now).unwrap_or(true)
            })
            .map(|e| *e.key())
            .collect();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(mut entry) = self.entries.get_mut(&id) else {
                continue;
            };
            let still_expired = entry.task.status == TaskStatus::Leased
                && entry.task.lease_expires_at.map(|exp| exp <= now).unwrap_or(true);
            if !still_expired {
                continue;
            }

            let disposition = rules::after_reclaim(&entry.task);
            rules::apply_failure(&mut entry.task, &disposition, Some("lease expired".to_string()), now);
            reclaimed.push(Reclaimed {
                task_id: id,
                attempt_count: entry.task.attempt_count,
                dead_lettered: matches!(disposition, FailureDisposition::DeadLetter { .. }),
            });
        }
        Ok(reclaimed)
    }

    async fn dead_letter_stuck(
        &self,
        ceiling: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, QueueError> {
        let ceiling = to_chrono(ceiling);
        let stuck: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|e| rules::is_stuck(&e.task, ceiling, now))
            .map(|e| *e.key())
            .collect();

        let mut moved = Vec::with_capacity(stuck.len());
        for id in stuck {
            if let Some(mut entry) = self.entries.get_mut(&id) {
                if rules::is_stuck(&entry.task, ceiling, now) {
                    rules::dead_letter(&mut entry.task, DeadLetterReason::Stuck, now);
                    moved.push(id);
                }
            }
        }
        Ok(moved)
    }
}

#[async_trait]
impl QueueAdmin for MemoryQueueStore {
    async fn get(&self, id: Uuid) -> Result<Option<Task>, QueueError> {
        Ok(self.entries.get(&id).map(|e| e.task.clone()))
    }

    async fn list(&self, filter: &TaskFilter, page: Page) -> Result<(Vec<Task>, u64), QueueError> {
        let mut matched: Vec<(OrderKey, Task)> = self
            .entries
            .iter()
            .filter(|e| filter.matches(&e.task))
            .map(|e| (e.order_key(), e.task.clone()))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(|(_, task)| task)
            .collect();
        Ok((items, total))
    }

    async fn stats(&self) -> Result<JobStats, QueueError> {
        let mut stats = JobStats::default();
        for entry in self.entries.iter() {
            stats.add_task(&entry.task);
        }
        Ok(stats)
    }

    async fn depths(&self) -> Result<Vec<QueueDepth>, QueueError> {
        let now = self.clock.now();
        let mut depths = empty_depths();
        for entry in self.entries.iter() {
            if let Some(depth) = depths.iter_mut().find(|d| d.queue == entry.task.queue) {
                depth.add_task(&entry.task, now);
            }
        }
        Ok(depths)
    }

    async fn terminate(&self, id: Uuid) -> Result<Task, QueueError> {
        let now = self.clock.now();
        let mut entry = self.entries.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        match entry.task.status {
            TaskStatus::Completed => Err(QueueError::InvalidTransition(format!(
                "task {} is already completed",
                id
            ))),
            TaskStatus::DeadLettered => Ok(entry.task.clone()),
            TaskStatus::Queued | TaskStatus::Leased => {
                rules::dead_letter(&mut entry.task, DeadLetterReason::Terminated, now);
                Ok(entry.task.clone())
            }
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), QueueError> {
        self.entries
            .remove(&id)
            .map(|_| ())
            .ok_or(QueueError::NotFound(id))
    }

    async fn requeue(&self, id: Uuid) -> Result<Task, QueueError> {
        let now = self.clock.now();
        let seq = self.next_seq();
        let mut entry = self.entries.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if entry.task.status != TaskStatus::DeadLettered {
            return Err(QueueError::InvalidTransition(format!(
                "task {} is {}, only dead-lettered tasks can be requeued",
                id, entry.task.status
            )));
        }
        rules::requeue_from_dead_letter(&mut entry.task, now);
        entry.seq = seq;
        Ok(entry.task.clone())
    }
}
