// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: String,
    pub url: String,
    pub domain: String,
    pub priority: i32,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub enqueued_at: ChronoDateTimeUtc,
    pub payload: Json,
    pub queue: String,
    pub status: String,
    pub not_before: Option<ChronoDateTimeUtc>,
    pub dead_letter_reason: Option<String>,
    pub last_error: Option<String>,
    pub lease_token: Option<Uuid>,
    pub lease_worker: Option<Uuid>,
    pub lease_acquired_at: Option<ChronoDateTimeUtc>,
    pub lease_expires_at: Option<ChronoDateTimeUtc>,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
