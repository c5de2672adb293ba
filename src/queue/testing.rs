// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::Lease;
use crate::domain::models::stats::{JobStats, QueueDepth};
use crate::domain::models::task::{QueueName, Task};
use crate::queue::task_queue::{
    CommitOutcome, CommitResult, EnqueueOutcome, LeaseIndex, Page, QueueAdmin, QueueError,
    QueueStore, Reclaimed, TaskFilter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// 始终不可用的队列后端，记录被调用的次数
#[derive(Default)]
pub struct UnavailableStore {
    calls: AtomicU32,
}

impl UnavailableStore {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, QueueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(QueueError::Store("connection refused".to_string()))
    }
}

#[async_trait]
impl QueueStore for UnavailableStore {
    async fn enqueue(&self, _task: Task) -> Result<EnqueueOutcome, QueueError> {
        self.fail()
    }

    async fn lease_pop(
        &self,
        _queue: QueueName,
        _worker_id: Uuid,
        _lease_duration: Duration,
    ) -> Result<Option<(Task, Lease)>, QueueError> {
        self.fail()
    }

    async fn commit(
        &self,
        _lease: &Lease,
        _outcome: CommitOutcome,
    ) -> Result<CommitResult, QueueError> {
        self.fail()
    }

    async fn release(&self, _lease: &Lease) -> Result<(), QueueError> {
        self.fail()
    }

    async fn defer(&self, _lease: &Lease, _not_before: DateTime<Utc>) -> Result<(), QueueError> {
        self.fail()
    }

    async fn renew(&self, _lease: &Lease, _extension: Duration) -> Result<Lease, QueueError> {
        self.fail()
    }

    async fn check_lease(&self, _lease: &Lease) -> Result<bool, QueueError> {
        self.fail()
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.fail()
    }
}

#[async_trait]
impl LeaseIndex for UnavailableStore {
    async fn reclaim_expired(&self, _now: DateTime<Utc>) -> Result<Vec<Reclaimed>, QueueError> {
        self.fail()
    }

    async fn dead_letter_stuck(
        &self,
        _ceiling: Duration,
        _now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, QueueError> {
        self.fail()
    }
}

#[async_trait]
impl QueueAdmin for UnavailableStore {
    async fn get(&self, _id: Uuid) -> Result<Option<Task>, QueueError> {
        self.fail()
    }

    async fn list(&self, _filter: &TaskFilter, _page: Page) -> Result<(Vec<Task>, u64), QueueError> {
        self.fail()
    }

    async fn stats(&self) -> Result<JobStats, QueueError> {
        self.fail()
    }

    async fn depths(&self) -> Result<Vec<QueueDepth>, QueueError> {
        self.fail()
    }

    async fn terminate(&self, _id: Uuid) -> Result<Task, QueueError> {
        self.fail()
    }

    async fn delete(&self, _id: Uuid) -> Result<(), QueueError> {
        self.fail()
    }

    async fn requeue(&self, _id: Uuid) -> Result<Task, QueueError> {
        self.fail()
    }
}
