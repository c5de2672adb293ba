// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 创建 URL 重爬记录表
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UrlRecords::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UrlRecords::Url).string_len(2048).not_null().primary_key())
                    .col(ColumnDef::new(UrlRecords::Domain).string().not_null())
                    .col(ColumnDef::new(UrlRecords::ContentClass).string_len(16).not_null())
                    .col(ColumnDef::new(UrlRecords::LastCrawledAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(UrlRecords::LastHash).string_len(128))
                    .col(
                        ColumnDef::new(UrlRecords::CurrentIntervalSecs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UrlRecords::NextEligibleAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(UrlRecords::State).string_len(16).not_null())
                    .col(ColumnDef::new(UrlRecords::Validators).json().not_null())
                    .col(
                        ColumnDef::new(UrlRecords::CrawlCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(UrlRecords::ReadmittedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(UrlRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_url_records_state_next_eligible")
                    .table(UrlRecords::Table)
                    .col(UrlRecords::State)
                    .col(UrlRecords::NextEligibleAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UrlRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UrlRecords {
    Table,
    Url,
    Domain,
    ContentClass,
    LastCrawledAt,
    LastHash,
    CurrentIntervalSecs,
    NextEligibleAt,
    State,
    Validators,
    CrawlCount,
    ReadmittedAt,
    UpdatedAt,
}
