// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{DeadLetterReason, QueueName, Task, TaskKind, TaskStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// 单个任务类型的状态计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub queued: u64,
    pub leased: u64,
    pub completed: u64,
    /// 在重试队列中等待退避的任务
    pub failed: u64,
    pub dead_lettered: u64,
    /// 因超过绝对时间上限被强制死信的任务
    pub stuck: u64,
}

impl KindStats {
    pub fn total(&self) -> u64 {
        self.queued + self.leased + self.completed + self.failed + self.dead_lettered + self.stuck
    }

    fn bump(&mut self, bucket: StatsBucket, by: u64) {
        match bucket {
            StatsBucket::Queued => self.queued += by,
            StatsBucket::Leased => self.leased += by,
            StatsBucket::Completed => self.completed += by,
            StatsBucket::Failed => self.failed += by,
            StatsBucket::DeadLettered => self.dead_lettered += by,
            StatsBucket::Stuck => self.stuck += by,
        }
    }
}

/// 聚合任务统计
///
/// 每次按需重新计算，不作为事实来源
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub crawl: KindStats,
    pub parse: KindStats,
}

impl JobStats {
    pub fn kind_mut(&mut self, kind: TaskKind) -> &mut KindStats {
        match kind {
            TaskKind::Crawl => &mut self.crawl,
            TaskKind::Parse => &mut self.parse,
        }
    }

    pub fn kind(&self, kind: TaskKind) -> &KindStats {
        match kind {
            TaskKind::Crawl => &self.crawl,
            TaskKind::Parse => &self.parse,
        }
    }

    /// 累加一组状态相同的任务
    pub fn add(
        &mut self,
        kind: TaskKind,
        status: TaskStatus,
        queue: QueueName,
        reason: Option<DeadLetterReason>,
        count: u64,
    ) {
        let bucket = StatsBucket::classify(status, queue, reason);
        self.kind_mut(kind).bump(bucket, count);
    }

    pub fn add_task(&mut self, task: &Task) {
        self.add(task.kind, task.status, task.queue, task.dead_letter_reason, 1);
    }

    /// 卡住任务总数
    pub fn stuck_total(&self) -> u64 {
        self.crawl.stuck + self.parse.stuck
    }
}

/// 统计分桶
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsBucket {
    Queued,
    Leased,
    Completed,
    Failed,
    DeadLettered,
    Stuck,
}

impl StatsBucket {
    /// 将任务状态归入统计分桶
    pub fn classify(
        status: TaskStatus,
        queue: QueueName,
        reason: Option<DeadLetterReason>,
    ) -> Self {
        match status {
            TaskStatus::Completed => StatsBucket::Completed,
            TaskStatus::DeadLettered if reason == Some(DeadLetterReason::Stuck) => {
                StatsBucket::Stuck
            }
            TaskStatus::DeadLettered => StatsBucket::DeadLettered,
            TaskStatus::Leased => StatsBucket::Leased,
            TaskStatus::Queued if queue == QueueName::Retry => StatsBucket::Failed,
            TaskStatus::Queued => StatsBucket::Queued,
        }
    }
}

/// 队列深度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub queue: QueueName,
    /// 立即可租用（死信队列中为保留的任务数）
    pub ready: u64,
    /// 等待 `not_before` 的任务
    pub delayed: u64,
    /// 已被租用的任务
    pub leased: u64,
}

impl QueueDepth {
    pub fn empty(queue: QueueName) -> Self {
        Self {
            queue,
            ready: 0,
            delayed: 0,
            leased: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.ready + self.delayed + self.leased
    }

    /// 计入一个任务，已完成的任务不计入深度
    pub fn add_task(&mut self, task: &Task, now: DateTime<Utc>) {
        match task.status {
            TaskStatus::Leased => self.leased += 1,
            TaskStatus::DeadLettered => self.ready += 1,
            TaskStatus::Queued if task.is_ready_at(now) => self.ready += 1,
            TaskStatus::Queued => self.delayed += 1,
            TaskStatus::Completed => {}
        }
    }
}

/// 按固定顺序生成全部队列的空深度
pub fn empty_depths() -> Vec<QueueDepth> {
    QueueName::all().into_iter().map(QueueDepth::empty).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            StatsBucket::classify(TaskStatus::Queued, QueueName::Retry, None),
            StatsBucket::Failed
        );
        assert_eq!(
            StatsBucket::classify(TaskStatus::Queued, QueueName::Frontier, None),
            StatsBucket::Queued
        );
        assert_eq!(
            StatsBucket::classify(
                TaskStatus::DeadLettered,
                QueueName::DeadLetter,
                Some(DeadLetterReason::Stuck)
            ),
            StatsBucket::Stuck
        );
        assert_eq!(
            StatsBucket::classify(
                TaskStatus::DeadLettered,
                QueueName::DeadLetter,
                Some(DeadLetterReason::Terminated)
            ),
            StatsBucket::DeadLettered
        );
    }

    #[test]
    fn test_job_stats_accumulates_per_kind() {
        let mut stats = JobStats::default();
        stats.add(TaskKind::Crawl, TaskStatus::Queued, QueueName::Frontier, None, 3);
        stats.add(TaskKind::Parse, TaskStatus::Completed, QueueName::Parse, None, 2);
        stats.add(
            TaskKind::Crawl,
            TaskStatus::DeadLettered,
            QueueName::DeadLetter,
            Some(DeadLetterReason::Stuck),
            1,
        );

        assert_eq!(stats.crawl.queued, 3);
        assert_eq!(stats.crawl.total(), 4);
        assert_eq!(stats.parse.completed, 2);
        assert_eq!(stats.stuck_total(), 1);
    }
}
