// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::to_chrono;
use crate::domain::models::recrawl::{UrlRecord, UrlState};
use crate::domain::repositories::url_record_repository::{RepositoryError, UrlRecordRepository};
use crate::infrastructure::database::entities::url_record::{self, Entity as UrlRecordEntity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use std::time::Duration;

/// 基于 sea-orm 的 URL 记录仓库
pub struct SqlUrlRecordRepository {
    db: Arc<DatabaseConnection>,
}

impl SqlUrlRecordRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl TryFrom<url_record::Model> for UrlRecord {
    type Error = RepositoryError;

    fn try_from(model: url_record::Model) -> Result<Self, Self::Error> {
        let corrupt = |e: crate::domain::models::task::DomainError| {
            RepositoryError::Corrupt(format!("{}: {}", model.url, e))
        };
        Ok(Self {
            content_class: model.content_class.parse().map_err(corrupt)?,
            state: model.state.parse().map_err(corrupt)?,
            validators: serde_json::from_value(model.validators.clone())
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            url: model.url,
            domain: model.domain,
            last_crawled_at: model.last_crawled_at,
            last_hash: model.last_hash,
            current_interval_secs: model.current_interval_secs,
            next_eligible_at: model.next_eligible_at,
            crawl_count: model.crawl_count.max(0) as u64,
            readmitted_at: model.readmitted_at,
            updated_at: model.updated_at,
        })
    }
}

impl TryFrom<&UrlRecord> for url_record::ActiveModel {
    type Error = RepositoryError;

    fn try_from(record: &UrlRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            url: Set(record.url.clone()),
            domain: Set(record.domain.clone()),
            content_class: Set(record.content_class.as_str().to_string()),
            last_crawled_at: Set(record.last_crawled_at),
            last_hash: Set(record.last_hash.clone()),
            current_interval_secs: Set(record.current_interval_secs),
            next_eligible_at: Set(record.next_eligible_at),
            state: Set(record.state.as_str().to_string()),
            validators: Set(serde_json::to_value(&record.validators)
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?),
            crawl_count: Set(record.crawl_count as i64),
            readmitted_at: Set(record.readmitted_at),
            updated_at: Set(record.updated_at),
        })
    }
}

#[async_trait]
impl UrlRecordRepository for SqlUrlRecordRepository {
    async fn find(&self, url: &str) -> Result<Option<UrlRecord>, RepositoryError> {
        UrlRecordEntity::find_by_id(url.to_string())
            .one(self.db.as_ref())
            .await?
            .map(UrlRecord::try_from)
            .transpose()
    }

    async fn upsert(&self, record: &UrlRecord) -> Result<(), RepositoryError> {
        use url_record::Column;
        let active = url_record::ActiveModel::try_from(record)?;
        UrlRecordEntity::insert(active)
            .on_conflict(
                OnConflict::column(Column::Url)
                    .update_columns([
                        Column::Domain,
                        Column::ContentClass,
                        Column::LastCrawledAt,
                        Column::LastHash,
                        Column::CurrentIntervalSecs,
                        Column::NextEligibleAt,
                        Column::State,
                        Column::Validators,
                        Column::CrawlCount,
                        Column::ReadmittedAt,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        stuck_ceiling: Duration,
        limit: u64,
    ) -> Result<Vec<UrlRecord>, RepositoryError> {
        use url_record::Column;
        let stuck_before = now - to_chrono(stuck_ceiling);

        let due = Condition::any()
            .add(Column::State.eq(UrlState::Eligible.as_str()))
            .add(
                Condition::all()
                    .add(Column::State.eq(UrlState::Completed.as_str()))
                    .add(Column::NextEligibleAt.lte(now)),
            )
            .add(
                Condition::all()
                    .add(Column::State.eq(UrlState::Leased.as_str()))
                    .add(
                        Condition::any()
                            .add(Column::ReadmittedAt.is_null())
                            .add(Column::ReadmittedAt.lte(stuck_before)),
                    ),
            );

        UrlRecordEntity::find()
            .filter(due)
            .order_by_asc(Column::NextEligibleAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(UrlRecord::try_from)
            .collect()
    }

    async fn claim_for_readmission(
        &self,
        url: &str,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        use url_record::Column;
        let result = UrlRecordEntity::update_many()
            .col_expr(Column::State, Expr::value(UrlState::Leased.as_str()))
            .col_expr(Column::ReadmittedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Url.eq(url))
            .filter(Column::UpdatedAt.eq(observed))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(UrlRecordEntity::find().count(self.db.as_ref()).await?)
    }
}
