// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// 结果存储错误
///
/// 存储失败按可重试的任务结果处理
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 结果存储特质
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// 持久化解析结果
    async fn persist(&self, task_id: Uuid, result: &serde_json::Value) -> Result<(), SinkError>;
}
