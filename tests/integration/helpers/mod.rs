// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{TimeZone, Utc};
use crawlq::config::settings::DatabaseSettings;
use crawlq::domain::models::task::{CrawlPayload, Task};
use crawlq::infrastructure::database::connection;
use crawlq::infrastructure::queue::memory::MemoryQueueStore;
use crawlq::infrastructure::queue::sql::SqlQueueStore;
use crawlq::queue::task_queue::QueueBackend;
use crawlq::utils::clock::{Clock, ManualClock};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// 固定起点的手动时钟
pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    ))
}

/// 已执行迁移的内存 SQLite 连接
pub async fn sqlite_db() -> Arc<DatabaseConnection> {
    let settings = DatabaseSettings {
        url: "sqlite::memory:".to_string(),
        max_connections: Some(1),
        min_connections: Some(1),
        connect_timeout: Some(5),
        idle_timeout: None,
    };
    let db = connection::create_pool(&settings).await.unwrap();
    connection::run_migrations(&db).await.unwrap();
    Arc::new(db)
}

/// 被测的队列后端
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Memory, Backend::Sqlite];

    pub async fn build(self, clock: Arc<ManualClock>) -> Arc<dyn QueueBackend> {
        let clock: Arc<dyn Clock> = clock;
        match self {
            Backend::Memory => Arc::new(MemoryQueueStore::new(clock)),
            Backend::Sqlite => Arc::new(SqlQueueStore::new(sqlite_db().await, clock)),
        }
    }
}

pub fn crawl_task(url: &str) -> Task {
    Task::crawl(url, &CrawlPayload::default()).unwrap()
}
