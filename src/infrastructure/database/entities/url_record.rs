// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "url_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub url: String,
    pub domain: String,
    pub content_class: String,
    pub last_crawled_at: Option<ChronoDateTimeUtc>,
    pub last_hash: Option<String>,
    pub current_interval_secs: i64,
    pub next_eligible_at: Option<ChronoDateTimeUtc>,
    pub state: String,
    pub validators: Json,
    pub crawl_count: i64,
    pub readmitted_at: Option<ChronoDateTimeUtc>,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
