// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{ParsePayload, Task};
use crate::domain::services::parser::{ParseError, Parser};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::json;

/// 默认解析器
///
/// 提取标题与正文长度，作为结果存储的最小记录
pub struct PassthroughParser {
    title_selector: Selector,
}

impl PassthroughParser {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            title_selector: Selector::parse("title")
                .map_err(|e| anyhow::anyhow!("invalid selector: {}", e))?,
        })
    }

    fn title(&self, body: &str) -> Option<String> {
        let document = Html::parse_document(body);
        document
            .select(&self.title_selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[async_trait]
impl Parser for PassthroughParser {
    async fn parse(&self, task: &Task, payload: &ParsePayload) -> Result<serde_json::Value, ParseError> {
        if payload.body.is_empty() {
            return Err(ParseError::Invalid("empty document".to_string()));
        }
        Ok(json!({
            "url": task.url,
            "domain": task.domain,
            "source_task_id": payload.source_task_id,
            "content_class": payload.content_class,
            "content_hash": payload.content_hash,
            "title": self.title(&payload.body),
            "length": payload.body.len(),
        }))
    }
}
