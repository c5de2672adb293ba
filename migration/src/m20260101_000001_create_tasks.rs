// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 创建任务表
///
/// 四个逻辑队列（frontier、parse、retry、dead_letter）共用一张表，
/// 通过 `queue` 与 `status` 列区分，租约字段与任务行存放在一起。
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tasks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tasks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Tasks::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(Tasks::Url).text().not_null())
                    .col(ColumnDef::new(Tasks::Domain).string().not_null())
                    .col(ColumnDef::new(Tasks::Priority).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Tasks::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Tasks::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(Tasks::EnqueuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Tasks::Payload).json().not_null())
                    .col(ColumnDef::new(Tasks::Queue).string_len(16).not_null())
                    .col(ColumnDef::new(Tasks::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Tasks::NotBefore).timestamp_with_time_zone())
                    .col(ColumnDef::new(Tasks::DeadLetterReason).string_len(16))
                    .col(ColumnDef::new(Tasks::LastError).text())
                    .col(ColumnDef::new(Tasks::LeaseToken).uuid())
                    .col(ColumnDef::new(Tasks::LeaseWorker).uuid())
                    .col(ColumnDef::new(Tasks::LeaseAcquiredAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Tasks::LeaseExpiresAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Tasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tasks_queue_status_priority")
                    .table(Tasks::Table)
                    .col(Tasks::Queue)
                    .col(Tasks::Status)
                    .col(Tasks::Priority)
                    .col(Tasks::EnqueuedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tasks_status_lease_expires")
                    .table(Tasks::Table)
                    .col(Tasks::Status)
                    .col(Tasks::LeaseExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tasks_domain")
                    .table(Tasks::Table)
                    .col(Tasks::Domain)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
    Kind,
    Url,
    Domain,
    Priority,
    AttemptCount,
    MaxAttempts,
    EnqueuedAt,
    Payload,
    Queue,
    Status,
    NotBefore,
    DeadLetterReason,
    LastError,
    LeaseToken,
    LeaseWorker,
    LeaseAcquiredAt,
    LeaseExpiresAt,
    UpdatedAt,
}
