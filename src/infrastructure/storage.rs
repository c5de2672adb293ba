// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::services::result_sink::{ResultSink, SinkError};
use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

/// 本地文件结果存储
///
/// 每个解析结果写入 `{directory}/{task_id}.json`，同一任务重复写入会覆盖
pub struct LocalResultSink {
    directory: PathBuf,
}

impl LocalResultSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl ResultSink for LocalResultSink {
    async fn persist(&self, task_id: Uuid, result: &serde_json::Value) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let bytes = serde_json::to_vec_pretty(result)?;
        let path = self.directory.join(format!("{}.json", task_id));
        let tmp = self.directory.join(format!("{}.json.tmp", task_id));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
