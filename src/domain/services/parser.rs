// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{ParsePayload, Task};
use async_trait::async_trait;
use thiserror::Error;

/// 解析错误类型
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    /// 输入无法处理，重试也不会成功
    #[error("Invalid input: {0}")]
    Invalid(String),
    /// 暂时性失败
    #[error("Parse failed: {0}")]
    Failed(String),
}

/// 解析器特质
///
/// 调度器只关心成功与否，返回值原样交给结果存储
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, task: &Task, payload: &ParsePayload) -> Result<serde_json::Value, ParseError>;
}
