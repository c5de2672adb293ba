// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::Lease;
use crate::domain::models::recrawl::ContentClass;
use crate::utils::url_utils::extract_domain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// 当前负载版本
pub const CURRENT_PAYLOAD_VERSION: u32 = 1;

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 任务实体
///
/// 调度的最小工作单元。任务只能通过队列存储的原子状态转换被修改，
/// 租约相关字段记录当前持有者，由存储在租用、提交、释放时维护。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// 任务唯一标识符
    pub id: Uuid,
    /// 任务类型
    pub kind: TaskKind,
    /// 目标URL
    pub url: String,
    /// 由URL推导出的域名（小写，不含端口）
    pub domain: String,
    /// 优先级，数值越大越先被租用
    pub priority: i32,
    /// 已失败的次数
    pub attempt_count: u32,
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 入队时间，由存储在入队时写入
    pub enqueued_at: DateTime<Utc>,
    /// 版本化的不透明负载，仅由具体任务类型的执行者解释
    pub payload: TaskPayload,
    /// 当前所在的逻辑队列
    pub queue: QueueName,
    /// 任务状态
    pub status: TaskStatus,
    /// 最早可被租用的时间（退避或容量延迟）
    pub not_before: Option<DateTime<Utc>>,
    /// 进入死信队列的原因
    pub dead_letter_reason: Option<DeadLetterReason>,
    /// 最近一次失败的错误信息
    pub last_error: Option<String>,
    /// 当前租约令牌
    pub lease_token: Option<Uuid>,
    /// 当前租约持有者
    pub lease_worker: Option<Uuid>,
    /// 租约获取时间
    pub lease_acquired_at: Option<DateTime<Utc>>,
    /// 租约过期时间
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// 最后更新时间
    pub updated_at: DateTime<Utc>,
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// 抓取任务，获取页面并发现链接
    Crawl,
    /// 解析任务，处理已抓取的页面内容
    Parse,
}

impl TaskKind {
    /// 任务类型所属的起始队列
    pub fn home_queue(&self) -> QueueName {
        match self {
            TaskKind::Crawl => QueueName::Frontier,
            TaskKind::Parse => QueueName::Parse,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Crawl => "crawl",
            TaskKind::Parse => "parse",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crawl" => Ok(TaskKind::Crawl),
            "parse" => Ok(TaskKind::Parse),
            other => Err(DomainError::ValidationError(format!(
                "unknown task kind: {}",
                other
            ))),
        }
    }
}

/// 逻辑队列名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// 待抓取URL队列
    Frontier,
    /// 待解析页面队列
    Parse,
    /// 退避重试队列
    Retry,
    /// 死信队列
    DeadLetter,
}

impl QueueName {
    /// 所有队列
    pub fn all() -> [QueueName; 4] {
        [
            QueueName::Frontier,
            QueueName::Parse,
            QueueName::Retry,
            QueueName::DeadLetter,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Frontier => "frontier",
            QueueName::Parse => "parse",
            QueueName::Retry => "retry",
            QueueName::DeadLetter => "dead_letter",
        }
    }

    /// 以该队列为起始队列的任务类型
    pub fn home_kind(&self) -> Option<TaskKind> {
        match self {
            QueueName::Frontier => Some(TaskKind::Crawl),
            QueueName::Parse => Some(TaskKind::Parse),
            QueueName::Retry | QueueName::DeadLetter => None,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frontier" => Ok(QueueName::Frontier),
            "parse" => Ok(QueueName::Parse),
            "retry" => Ok(QueueName::Retry),
            "dead_letter" | "dead-letter" => Ok(QueueName::DeadLetter),
            other => Err(DomainError::ValidationError(format!(
                "unknown queue: {}",
                other
            ))),
        }
    }
}

/// 任务状态
///
/// Queued → Leased → Completed / DeadLettered，
/// 重试与租约回收会让任务回到 Queued。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 排队中
    #[default]
    Queued,
    /// 已被某个工作者租用
    Leased,
    /// 已成功完成
    Completed,
    /// 已进入死信队列
    DeadLettered,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Leased => "leased",
            TaskStatus::Completed => "completed",
            TaskStatus::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "leased" => Ok(TaskStatus::Leased),
            "completed" => Ok(TaskStatus::Completed),
            "dead_lettered" => Ok(TaskStatus::DeadLettered),
            other => Err(DomainError::ValidationError(format!(
                "unknown task status: {}",
                other
            ))),
        }
    }
}

/// 死信原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// 尝试次数耗尽
    Exhausted,
    /// 永久性失败
    Permanent,
    /// 被管理员终止
    Terminated,
    /// 超过绝对时间上限
    Stuck,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Exhausted => "exhausted",
            DeadLetterReason::Permanent => "permanent",
            DeadLetterReason::Terminated => "terminated",
            DeadLetterReason::Stuck => "stuck",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeadLetterReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exhausted" => Ok(DeadLetterReason::Exhausted),
            "permanent" => Ok(DeadLetterReason::Permanent),
            "terminated" => Ok(DeadLetterReason::Terminated),
            "stuck" => Ok(DeadLetterReason::Stuck),
            other => Err(DomainError::ValidationError(format!(
                "unknown dead letter reason: {}",
                other
            ))),
        }
    }
}

/// 版本化任务负载
///
/// 调度核心从不解释 `data`，只有对应类型的工作者会将其转换为强类型视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// 负载版本
    pub version: u32,
    /// 负载内容
    pub data: serde_json::Value,
}

impl Default for TaskPayload {
    fn default() -> Self {
        Self {
            version: CURRENT_PAYLOAD_VERSION,
            data: serde_json::Value::Null,
        }
    }
}

impl TaskPayload {
    /// 从可序列化的值构建负载
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, DomainError> {
        let data = serde_json::to_value(value)
            .map_err(|e| DomainError::InvalidPayload(e.to_string()))?;
        Ok(Self {
            version: CURRENT_PAYLOAD_VERSION,
            data,
        })
    }

    /// 解析为抓取负载
    ///
    /// 空负载视为默认抓取负载（深度 0，无校验信息）
    pub fn crawl(&self) -> Result<CrawlPayload, DomainError> {
        self.check_version()?;
        if self.data.is_null() {
            return Ok(CrawlPayload::default());
        }
        serde_json::from_value(self.data.clone())
            .map_err(|e| DomainError::InvalidPayload(e.to_string()))
    }

    /// 解析为解析负载
    pub fn parse(&self) -> Result<ParsePayload, DomainError> {
        self.check_version()?;
        serde_json::from_value(self.data.clone())
            .map_err(|e| DomainError::InvalidPayload(e.to_string()))
    }

    fn check_version(&self) -> Result<(), DomainError> {
        if self.version > CURRENT_PAYLOAD_VERSION {
            return Err(DomainError::InvalidPayload(format!(
                "unsupported payload version {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// 条件请求校验信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    /// ETag 响应头
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Last-Modified 响应头
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// 上次抓取的内容哈希，304 时沿用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none() && self.content_hash.is_none()
    }
}

/// 抓取任务负载
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlPayload {
    /// 距离种子的链接深度
    #[serde(default)]
    pub depth: u32,
    /// 发现该链接的父任务
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// 额外请求头
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// 条件请求校验信息
    #[serde(default)]
    pub validators: Validators,
}

/// 解析任务负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsePayload {
    /// 页面内容
    pub body: String,
    /// 内容分类
    pub content_class: ContentClass,
    /// 内容哈希
    pub content_hash: String,
    /// 产生该解析任务的抓取任务
    pub source_task_id: Uuid,
}

/// 领域错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// URL 无法解析或不含主机
    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    /// 负载无法解释
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Task {
    /// 创建一个新的任务
    ///
    /// # 参数
    ///
    /// * `kind` - 任务类型
    /// * `url` - 目标URL
    /// * `payload` - 任务负载
    ///
    /// # 返回值
    ///
    /// * `Ok(Task)` - 位于起始队列、状态为排队中的任务
    /// * `Err(DomainError::InvalidUrl)` - URL 不含主机
    pub fn new(kind: TaskKind, url: impl Into<String>, payload: TaskPayload) -> Result<Self, DomainError> {
        let url = url.into();
        let domain = extract_domain(&url).ok_or_else(|| DomainError::InvalidUrl(url.clone()))?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            url,
            domain,
            priority: 0,
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at: now,
            payload,
            queue: kind.home_queue(),
            status: TaskStatus::Queued,
            not_before: None,
            dead_letter_reason: None,
            last_error: None,
            lease_token: None,
            lease_worker: None,
            lease_acquired_at: None,
            lease_expires_at: None,
            updated_at: now,
        })
    }

    /// 创建抓取任务
    pub fn crawl(url: impl Into<String>, payload: &CrawlPayload) -> Result<Self, DomainError> {
        Self::new(TaskKind::Crawl, url, TaskPayload::encode(payload)?)
    }

    /// 创建解析任务
    pub fn parse(url: impl Into<String>, payload: &ParsePayload) -> Result<Self, DomainError> {
        Self::new(TaskKind::Parse, url, TaskPayload::encode(payload)?)
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// 由URL确定的任务ID
    ///
    /// 并发发现同一链接时通过幂等入队去重
    pub fn id_for_url(url: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
    }

    /// 任务的起始队列
    pub fn origin(&self) -> QueueName {
        self.kind.home_queue()
    }

    /// 给定租约是否为该任务当前有效的租约
    pub fn holds_valid_lease(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Leased
            && self.lease_token == Some(lease.token)
            && self.lease_expires_at.map(|exp| now < exp).unwrap_or(false)
    }

    /// 是否可在 `now` 被租用
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Queued && self.not_before.map(|nb| nb <= now).unwrap_or(true)
    }

    /// 尝试次数是否已耗尽
    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    pub(crate) fn clear_lease(&mut self) {
        self.lease_token = None;
        self.lease_worker = None;
        self.lease_acquired_at = None;
        self.lease_expires_at = None;
    }

    pub(crate) fn set_lease(&mut self, lease: &Lease) {
        self.status = TaskStatus::Leased;
        self.lease_token = Some(lease.token);
        self.lease_worker = Some(lease.worker_id);
        self.lease_acquired_at = Some(lease.acquired_at);
        self.lease_expires_at = Some(lease.expires_at);
        self.updated_at = lease.acquired_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_derives_domain() {
        let task = Task::new(TaskKind::Crawl, "https://A.test:8080/x", TaskPayload::default()).unwrap();
        assert_eq!(task.domain, "a.test");
        assert_eq!(task.queue, QueueName::Frontier);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempt_count, 0);
    }

    #[test]
    fn test_new_task_rejects_hostless_url() {
        let err = Task::new(TaskKind::Crawl, "not-a-url", TaskPayload::default()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidUrl(_)));
    }

    #[test]
    fn test_id_for_url_is_stable() {
        assert_eq!(
            Task::id_for_url("https://a.test/page"),
            Task::id_for_url("https://a.test/page")
        );
        assert_ne!(
            Task::id_for_url("https://a.test/page"),
            Task::id_for_url("https://a.test/other")
        );
    }

    #[test]
    fn test_crawl_payload_view() {
        let payload = CrawlPayload {
            depth: 2,
            parent_id: Some(Uuid::new_v4()),
            validators: Validators {
                etag: Some("\"abc\"".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let task = Task::crawl("https://a.test/", &payload).unwrap();
        assert_eq!(task.payload.version, CURRENT_PAYLOAD_VERSION);
        assert_eq!(task.payload.crawl().unwrap(), payload);

        // 空负载按默认值解释
        let bare = Task::new(TaskKind::Crawl, "https://a.test/", TaskPayload::default()).unwrap();
        assert_eq!(bare.payload.crawl().unwrap().depth, 0);
    }

    #[test]
    fn test_future_payload_version_rejected() {
        let payload = TaskPayload {
            version: CURRENT_PAYLOAD_VERSION + 1,
            data: serde_json::json!({}),
        };
        assert!(payload.crawl().is_err());
    }

    #[test]
    fn test_enum_round_trip_strings() {
        for queue in QueueName::all() {
            assert_eq!(queue.as_str().parse::<QueueName>().unwrap(), queue);
        }
        assert_eq!("dead_lettered".parse::<TaskStatus>().unwrap(), TaskStatus::DeadLettered);
        assert_eq!(
            serde_json::to_string(&QueueName::DeadLetter).unwrap(),
            "\"dead_letter\""
        );
    }
}
