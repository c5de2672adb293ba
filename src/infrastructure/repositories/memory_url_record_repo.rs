// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::recrawl::{UrlRecord, UrlState};
use crate::domain::repositories::url_record_repository::{RepositoryError, UrlRecordRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

/// 内存中的 URL 记录仓库，用于内存队列后端与测试
#[derive(Default)]
pub struct MemoryUrlRecordRepository {
    records: DashMap<String, UrlRecord>,
}

impl MemoryUrlRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UrlRecordRepository for MemoryUrlRecordRepository {
    async fn find(&self, url: &str) -> Result<Option<UrlRecord>, RepositoryError> {
        Ok(self.records.get(url).map(|r| r.clone()))
    }

    async fn upsert(&self, record: &UrlRecord) -> Result<(), RepositoryError> {
        self.records.insert(record.url.clone(), record.clone());
        Ok(())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        stuck_ceiling: Duration,
        limit: u64,
    ) -> Result<Vec<UrlRecord>, RepositoryError> {
        let mut due: Vec<UrlRecord> = self
            .records
            .iter()
            .filter(|r| r.is_due(now, stuck_ceiling))
            .map(|r| r.clone())
            .collect();
        due.sort_by_key(|r| r.next_eligible_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn claim_for_readmission(
        &self,
        url: &str,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let Some(mut record) = self.records.get_mut(url) else {
            return Ok(false);
        };
        if record.updated_at != observed {
            return Ok(false);
        }
        record.state = UrlState::Leased;
        record.readmitted_at = Some(now);
        record.updated_at = now;
        Ok(true)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.records.len() as u64)
    }
}
