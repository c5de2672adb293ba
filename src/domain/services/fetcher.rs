// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::recrawl::ContentClass;
use crate::domain::models::task::{CrawlPayload, Validators};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// 抓取错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// 暂时性错误，按退避重试
    Transient,
    /// 永久性错误，直接进入死信
    Permanent,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FetchErrorKind::Transient => write!(f, "transient"),
            FetchErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// 抓取错误
///
/// 未明确标记为永久性的错误一律视为暂时性错误
#[derive(Error, Debug, Clone)]
#[error("{kind} fetch error: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FetchErrorKind::Permanent
    }
}

/// 抓取结果
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// 页面内容，内容未变化（304）时为空
    pub body: String,
    /// 发现的绝对链接
    pub links: Vec<String>,
    /// 内容分类
    pub content_class: ContentClass,
    /// 条件请求校验信息
    pub validators: Validators,
    /// 内容哈希
    pub content_hash: String,
    /// 服务器确认内容未变化
    pub not_modified: bool,
}

/// 抓取器特质
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// 抓取页面
    ///
    /// # 参数
    ///
    /// * `url` - 目标URL
    /// * `payload` - 抓取负载，包含请求头与条件请求信息
    async fn fetch(&self, url: &str, payload: &CrawlPayload) -> Result<FetchedPage, FetchError>;
}
