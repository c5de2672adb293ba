// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::{to_chrono, Lease};
use crate::domain::models::stats::{empty_depths, JobStats, QueueDepth};
use crate::domain::models::task::{DeadLetterReason, QueueName, Task, TaskStatus};
use crate::infrastructure::cache::redis_client::RedisClient;
use crate::queue::rules::{self, FailureDisposition};
use crate::queue::task_queue::{
    CommitOutcome, CommitResult, EnqueueOutcome, LeaseIndex, Page, QueueAdmin, QueueError,
    QueueStore, Reclaimed, TaskFilter,
};
use crate::utils::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// 每次从有序集合读取的候选数
const SCAN_BATCH: isize = 64;
/// 单次扫描最多处理的过期租约数
const SWEEP_BATCH: isize = 500;

/// 以版本号为条件写入任务并维护索引
///
/// KEYS[1] 任务哈希，KEYS[2] 租约有序集合，KEYS[3] 全部任务集合
/// ARGV: 期望版本（空表示任务必须不存在）、任务JSON、新索引键、分值、成员、租约过期毫秒（空表示移除）、任务ID
const CAS_SCRIPT: &str = r#"
    local current = redis.call("HGET", KEYS[1], "version")
    if ARGV[1] == "" then
        if current then return 0 end
    elseif current ~= ARGV[1] then
        return 0
    end

    local old_index = redis.call("HGET", KEYS[1], "index")
    local old_member = redis.call("HGET", KEYS[1], "member")
    if old_index and old_index ~= "" and old_member then
        redis.call("ZREM", old_index, old_member)
    end

    local version = redis.call("HINCRBY", KEYS[1], "version", 1)
    redis.call("HSET", KEYS[1], "task", ARGV[2], "index", ARGV[3], "member", ARGV[5])
    if ARGV[3] ~= "" then
        redis.call("ZADD", ARGV[3], ARGV[4], ARGV[5])
    end
    if ARGV[6] ~= "" then
        redis.call("ZADD", KEYS[2], ARGV[6], ARGV[7])
    else
        redis.call("ZREM", KEYS[2], ARGV[7])
    end
    redis.call("SADD", KEYS[3], ARGV[7])
    return version
"#;

/// 删除任务及其全部索引
const DELETE_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then
        return 0
    end
    local index = redis.call("HGET", KEYS[1], "index")
    local member = redis.call("HGET", KEYS[1], "member")
    if index and index ~= "" and member then
        redis.call("ZREM", index, member)
    end
    redis.call("ZREM", KEYS[2], ARGV[1])
    redis.call("SREM", KEYS[3], ARGV[1])
    redis.call("DEL", KEYS[1])
    return 1
"#;

/// 读取到的任务及其版本
struct Versioned {
    task: Task,
    version: u64,
}

/// Redis 队列存储
///
/// 每个任务保存为一个哈希（JSON 与版本号），排队中的任务位于所属队列的有序集合，
/// 分值为负优先级，成员以入队时间和ID开头，因此同分值时按成员字典序先进先出。
/// 每次状态转换都是一次以版本号为条件的 Lua 脚本调用。
pub struct RedisQueueStore {
    client: RedisClient,
    clock: Arc<dyn Clock>,
    cas_script: Script,
    delete_script: Script,
}

impl RedisQueueStore {
    /// 创建 Redis 队列存储
    ///
    /// # 参数
    ///
    /// * `client` - Redis客户端，其键前缀决定了队列的命名空间
    /// * `clock` - 时钟
    pub fn new(client: RedisClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            clock,
            cas_script: Script::new(CAS_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        }
    }

    fn task_key(&self, id: Uuid) -> String {
        self.client.key(&format!("task:{}", id))
    }

    fn queue_key(&self, queue: QueueName) -> String {
        self.client.key(&format!("queue:{}", queue.as_str()))
    }

    fn leases_key(&self) -> String {
        self.client.key("leases")
    }

    fn all_key(&self) -> String {
        self.client.key("all")
    }

    fn member(task: &Task) -> String {
        format!("{:020}:{}", task.enqueued_at.timestamp_micros().max(0), task.id)
    }

    fn member_id(member: &str) -> Option<Uuid> {
        member.split_once(':').and_then(|(_, id)| Uuid::parse_str(id).ok())
    }

    async fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.connection().await?)
    }

    async fn load(
        &self,
        conn: &mut MultiplexedConnection,
        id: Uuid,
    ) -> Result<Option<Versioned>, QueueError> {
        let (raw, version): (Option<String>, Option<u64>) = redis::cmd("HMGET")
            .arg(self.task_key(id))
            .arg("task")
            .arg("version")
            .query_async(conn)
            .await?;
        match (raw, version) {
            (Some(raw), Some(version)) => Ok(Some(Versioned {
                task: serde_json::from_str(&raw)?,
                version,
            })),
            _ => Ok(None),
        }
    }

    async fn load_many(
        &self,
        conn: &mut MultiplexedConnection,
        ids: &[Uuid],
    ) -> Result<Vec<Task>, QueueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("HGET").arg(self.task_key(*id)).arg("task");
        }
        let raw: Vec<Option<String>> = pipe.query_async(conn).await?;
        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(QueueError::from))
            .collect()
    }

    async fn all_tasks(&self, conn: &mut MultiplexedConnection) -> Result<Vec<Task>, QueueError> {
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.all_key())
            .query_async(conn)
            .await?;
        let ids: Vec<Uuid> = ids.iter().filter_map(|s| Uuid::parse_str(s).ok()).collect();
        self.load_many(conn, &ids).await
    }

    /// 以版本号为条件写入任务
    ///
    /// # 参数
    ///
    /// * `expected` - 期望的当前版本，`None` 表示任务必须不存在
    /// * `task` - 新状态
    ///
    /// # 返回值
    ///
    /// 条件满足并写入时返回 `true`
    async fn cas(
        &self,
        conn: &mut MultiplexedConnection,
        expected: Option<u64>,
        task: &Task,
    ) -> Result<bool, QueueError> {
        let index = match task.status {
            TaskStatus::Queued => self.queue_key(task.queue),
            TaskStatus::DeadLettered => self.queue_key(QueueName::DeadLetter),
            TaskStatus::Leased | TaskStatus::Completed => String::new(),
        };
        let lease_score = match (task.status, task.lease_expires_at) {
            (TaskStatus::Leased, Some(expires_at)) => expires_at.timestamp_millis().to_string(),
            _ => String::new(),
        };

        let version: u64 = self
            .cas_script
            .key(self.task_key(task.id))
            .key(self.leases_key())
            .key(self.all_key())
            .arg(expected.map(|v| v.to_string()).unwrap_or_default())
            .arg(serde_json::to_string(task)?)
            .arg(index)
            .arg(-(task.priority as i64))
            .arg(Self::member(task))
            .arg(lease_score)
            .arg(task.id.to_string())
            .invoke_async(conn)
            .await?;
        Ok(version > 0)
    }

    /// 在一个有序集合中找到第一个可租用的任务
    async fn first_ready(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<Versioned>, QueueError> {
        let mut start = 0isize;
        loop {
            let members: Vec<String> = redis::cmd("ZRANGE")
                .arg(key)
                .arg(start)
                .arg(start + SCAN_BATCH - 1)
                .query_async(conn)
                .await?;
            if members.is_empty() {
                return Ok(None);
            }
            for member in &members {
                let Some(id) = Self::member_id(member) else {
                    continue;
                };
                if let Some(candidate) = self.load(conn, id).await? {
                    if rules::is_candidate(&candidate.task, queue, now) {
                        return Ok(Some(candidate));
                    }
                }
            }
            start += SCAN_BATCH;
        }
    }

    /// 读取持有租约的任务并校验
    async fn load_leased(
        &self,
        conn: &mut MultiplexedConnection,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<Versioned, QueueError> {
        let current = self
            .load(conn, lease.task_id)
            .await?
            .ok_or(QueueError::LeaseLost(lease.task_id))?;
        rules::validate_lease(&current.task, lease, now)?;
        Ok(current)
    }

    /// 在租约下执行一次状态转换
    ///
    /// 版本号冲突说明任务已被回收、终止或由其他调用方修改，重新读取以给出准确的错误
    async fn transition_under_lease<T, F>(&self, lease: &Lease, mutate: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut Task, DateTime<Utc>) -> T + Send,
        T: Send,
    {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        let Versioned { mut task, version } = self.load_leased(&mut conn, lease, now).await?;
        let result = mutate(&mut task, now);
        if self.cas(&mut conn, Some(version), &task).await? {
            return Ok(result);
        }
        match self.load(&mut conn, lease.task_id).await? {
            Some(current) => {
                rules::validate_lease(&current.task, lease, now)?;
                Err(QueueError::LeaseLost(lease.task_id))
            }
            None => Err(QueueError::LeaseLost(lease.task_id)),
        }
    }

    async fn admin_transition<F>(&self, id: Uuid, mut transition: F) -> Result<Task, QueueError>
    where
        F: FnMut(&Task, DateTime<Utc>) -> Result<Option<Task>, QueueError> + Send,
    {
        let mut conn = self.conn().await?;
        loop {
            let now = self.clock.now();
            let current = self.load(&mut conn, id).await?.ok_or(QueueError::NotFound(id))?;
            let Some(next) = transition(&current.task, now)? else {
                return Ok(current.task);
            };
            if self.cas(&mut conn, Some(current.version), &next).await? {
                return Ok(next);
            }
            debug!(task_id = %id, "Concurrent update detected, retrying admin transition");
        }
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome, QueueError> {
        let prepared = rules::prepare_for_enqueue(task, self.clock.now());
        let mut conn = self.conn().await?;

        let expected = match self.load(&mut conn, prepared.id).await? {
            None => None,
            Some(existing) => match existing.task.status {
                TaskStatus::DeadLettered => return Err(QueueError::DeadLettered(existing.task.id)),
                TaskStatus::Queued | TaskStatus::Leased => return Ok(EnqueueOutcome::Duplicate),
                TaskStatus::Completed => Some(existing.version),
            },
        };

        if self.cas(&mut conn, expected, &prepared).await? {
            Ok(EnqueueOutcome::Enqueued)
        } else {
            Ok(EnqueueOutcome::Duplicate)
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
        let mut keys = vec![self.queue_key(queue)];
        if queue != QueueName::Retry {
            keys.push(self.queue_key(QueueName::Retry));
        }

        let mut conn = self.conn().await?;
        loop {
            let now = self.clock.now();
            let mut best: Option<Versioned> = None;
            for key in &keys {
                if let Some(candidate) = self.first_ready(&mut conn, key, queue, now).await? {
                    let better = best.as_ref().map_or(true, |b| {
                        (Reverse(candidate.task.priority), candidate.task.enqueued_at, candidate.task.id)
                            < (Reverse(b.task.priority), b.task.enqueued_at, b.task.id)
                    });
                    if better {
                        best = Some(candidate);
                    }
                }
            }

            let Some(Versioned { mut task, version }) = best else {
                return Ok(None);
            };

            if task.is_exhausted() {
                rules::dead_letter(&mut task, DeadLetterReason::Exhausted, now);
                self.cas(&mut conn, Some(version), &task).await?;
                debug!(task_id = %task.id, "Exhausted task dead-lettered at lease time");
                continue;
            }

            let lease = Lease::grant(task.id, worker_id, now, lease_duration);
            task.set_lease(&lease);
            task.not_before = None;
            if self.cas(&mut conn, Some(version), &task).await? {
                return Ok(Some((task, lease)));
            }
            debug!(task_id = %task.id, "Lost lease race, selecting next candidate");
        }
    }

    async fn commit(
        &self,
        lease: &Lease,
        outcome: CommitOutcome,
    ) -> Result<CommitResult, QueueError> {
        self.transition_under_lease(lease, |task, now| rules::apply_commit(task, outcome, now))
            .await
    }

    async fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        self.transition_under_lease(lease, |task, now| rules::return_to_queue(task, None, now))
            .await
    }

    async fn defer(&self, lease: &Lease, not_before: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition_under_lease(lease, |task, now| {
            rules::return_to_queue(task, Some(not_before), now)
        })
        .await
    }

    async fn renew(&self, lease: &Lease, extension: Duration) -> Result<Lease, QueueError> {
        self.transition_under_lease(lease, |task, now| {
            let renewed = Lease {
                expires_at: now + to_chrono(extension),
                ..lease.clone()
            };
            task.lease_expires_at = Some(renewed.expires_at);
            task.updated_at = now;
            renewed
        })
        .await
    }

    async fn check_lease(&self, lease: &Lease) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        Ok(self
            .load(&mut conn, lease.task_id)
            .await?
            .map(|current| current.task.holds_valid_lease(lease, now))
            .unwrap_or(false))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(self.client.ping().await?)
    }
}

#[async_trait]
impl LeaseIndex for RedisQueueStore {
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<Reclaimed>, QueueError> {
        let mut conn = self.conn().await?;
        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.leases_key())
            .arg("-inf")
            .arg(now.timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(SWEEP_BATCH)
            .query_async(&mut conn)
            .await?;

        let mut reclaimed = Vec::with_capacity(expired.len());
        for id in expired.iter().filter_map(|s| Uuid::parse_str(s).ok()) {
            let Some(Versioned { mut task, version }) = self.load(&mut conn, id).await? else {
                continue;
            };
            let still_expired = task.status == TaskStatus::Leased
                && task.lease_expires_at.map_or(true, |expires_at| expires_at <= now);
            if !still_expired {
                continue;
            }

            let disposition = rules::after_reclaim(&task);
            rules::apply_failure(&mut task, &disposition, Some("lease expired".to_string()), now);
            if self.cas(&mut conn, Some(version), &task).await? {
                reclaimed.push(Reclaimed {
                    task_id: task.id,
                    attempt_count: task.attempt_count,
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
        let ceiling = to_chrono(ceiling);
        let mut conn = self.conn().await?;
        let candidates: Vec<Uuid> = self
            .all_tasks(&mut conn)
            .await?
            .into_iter()
            .filter(|task| rules::is_stuck(task, ceiling, now))
            .map(|task| task.id)
            .collect();

        let mut moved = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(Versioned { mut task, version }) = self.load(&mut conn, id).await? else {
                continue;
            };
            if !rules::is_stuck(&task, ceiling, now) {
                continue;
            }
            rules::dead_letter(&mut task, DeadLetterReason::Stuck, now);
            if self.cas(&mut conn, Some(version), &task).await? {
                moved.push(id);
            }
        }
        Ok(moved)
    }
}

#[async_trait]
impl QueueAdmin for RedisQueueStore {
    async fn get(&self, id: Uuid) -> Result<Option<Task>, QueueError> {
        let mut conn = self.conn().await?;
        Ok(self.load(&mut conn, id).await?.map(|v| v.task))
    }

    async fn list(&self, filter: &TaskFilter, page: Page) -> Result<(Vec<Task>, u64), QueueError> {
        let mut conn = self.conn().await?;
        let mut tasks: Vec<Task> = self
            .all_tasks(&mut conn)
            .await?
            .into_iter()
            .filter(|task| filter.matches(task))
            .collect();
        tasks.sort_by_key(|t| (Reverse(t.priority), t.enqueued_at, t.id));

        let total = tasks.len() as u64;
        let page_items = tasks
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok((page_items, total))
    }

    async fn stats(&self) -> Result<JobStats, QueueError> {
        let mut conn = self.conn().await?;
        let mut stats = JobStats::default();
        for task in self.all_tasks(&mut conn).await? {
            stats.add_task(&task);
        }
        Ok(stats)
    }

    async fn depths(&self) -> Result<Vec<QueueDepth>, QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        let mut depths = empty_depths();
        for task in self.all_tasks(&mut conn).await? {
            if let Some(depth) = depths.iter_mut().find(|d| d.queue == task.queue) {
                depth.add_task(&task, now);
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
        let mut conn = self.conn().await?;
        let deleted: i64 = self
            .delete_script
            .key(self.task_key(id))
            .key(self.leases_key())
            .key(self.all_key())
            .arg(id.to_string())
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
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
