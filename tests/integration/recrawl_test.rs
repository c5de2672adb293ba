// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{manual_clock, sqlite_db};
use crawlq::config::settings::Settings;
use crawlq::domain::models::recrawl::{ContentClass, UrlState};
use crawlq::domain::models::task::{Task, TaskStatus, Validators};
use crawlq::domain::repositories::url_record_repository::UrlRecordRepository;
use crawlq::domain::services::recrawl_service::RecrawlScheduler;
use crawlq::infrastructure::queue::memory::MemoryQueueStore;
use crawlq::infrastructure::repositories::memory_url_record_repo::MemoryUrlRecordRepository;
use crawlq::infrastructure::repositories::url_record_repo_impl::SqlUrlRecordRepository;
use crawlq::queue::task_queue::{QueueAdmin, QueueBackend};
use crawlq::utils::clock::ManualClock;
use std::sync::Arc;
use std::time::Duration;

const URL: &str = "https://a.test/page";

struct Fixture {
    clock: Arc<ManualClock>,
    queue: Arc<dyn QueueBackend>,
    repository: Arc<dyn UrlRecordRepository>,
    scheduler: RecrawlScheduler,
}

async fn fixtures() -> Vec<Fixture> {
    let repositories: Vec<Arc<dyn UrlRecordRepository>> = vec![
        Arc::new(MemoryUrlRecordRepository::new()),
        Arc::new(SqlUrlRecordRepository::new(sqlite_db().await)),
    ];
    let policies = Settings::defaults().unwrap().recrawl.policies();

    repositories
        .into_iter()
        .map(|repository| {
            let clock = manual_clock();
            let queue: Arc<dyn QueueBackend> = Arc::new(MemoryQueueStore::new(clock.clone()));
            let scheduler = RecrawlScheduler::new(
                repository.clone(),
                queue.clone(),
                clock.clone(),
                policies.clone(),
                Duration::from_secs(7200),
                3,
            );
            Fixture {
                clock,
                queue,
                repository,
                scheduler,
            }
        })
        .collect()
}

fn validators(etag: &str) -> Validators {
    Validators {
        etag: Some(etag.to_string()),
        last_modified: None,
        content_hash: Some("h1".to_string()),
    }
}

#[tokio::test]
async fn test_due_url_is_readmitted_once_with_validators() {
    for f in fixtures().await {
        f.scheduler
            .record_completion(URL, "a.test", ContentClass::Static, "h1", validators("\"v1\""))
            .await
            .unwrap();
        assert_eq!(f.scheduler.readmit_due(10).await.unwrap(), 0);

        f.clock.advance(chrono::Duration::hours(48));
        assert_eq!(f.scheduler.readmit_due(10).await.unwrap(), 1);
        assert_eq!(f.scheduler.readmit_due(10).await.unwrap(), 0);

        let task = f.queue.get(Task::id_for_url(URL)).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        let payload = task.payload.crawl().unwrap();
        assert_eq!(payload.validators.etag.as_deref(), Some("\"v1\""));

        let record = f.repository.find(URL).await.unwrap().unwrap();
        assert_eq!(record.state, UrlState::Leased);
        assert!(record.readmitted_at.is_some());
    }
}

#[tokio::test]
async fn test_unfinished_readmission_becomes_due_after_ceiling() {
    for f in fixtures().await {
        f.scheduler
            .record_completion(URL, "a.test", ContentClass::Dynamic, "h1", Validators::default())
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::hours(6));
        assert_eq!(f.scheduler.readmit_due(10).await.unwrap(), 1);

        f.clock.advance(chrono::Duration::hours(1));
        assert!(f.scheduler.due(10).await.unwrap().is_empty());

        f.clock.advance(chrono::Duration::hours(1) + chrono::Duration::seconds(1));
        assert_eq!(f.scheduler.due(10).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_changed_content_shortens_interval() {
    for f in fixtures().await {
        let first = f
            .scheduler
            .record_completion(URL, "a.test", ContentClass::Static, "h1", Validators::default())
            .await
            .unwrap();
        assert_eq!(first.current_interval(), Duration::from_secs(48 * 3600));

        f.clock.advance(chrono::Duration::hours(48));
        let second = f
            .scheduler
            .record_completion(URL, "a.test", ContentClass::Static, "h2", Validators::default())
            .await
            .unwrap();
        assert_eq!(second.current_interval(), Duration::from_secs(24 * 3600));
        assert_eq!(second.crawl_count, 2);

        // 分类变化时回到新分类的基础间隔
        let third = f
            .scheduler
            .record_completion(URL, "a.test", ContentClass::Dynamic, "h2", Validators::default())
            .await
            .unwrap();
        assert_eq!(third.current_interval(), Duration::from_secs(6 * 3600));
    }
}

#[tokio::test]
async fn test_tracking_and_known_class() {
    for f in fixtures().await {
        assert!(!f.scheduler.is_tracked(URL).await.unwrap());
        assert_eq!(f.scheduler.known_class(URL).await.unwrap(), None);

        f.scheduler
            .record_completion(URL, "a.test", ContentClass::Rendered, "h1", Validators::default())
            .await
            .unwrap();
        assert!(f.scheduler.is_tracked(URL).await.unwrap());
        assert_eq!(
            f.scheduler.known_class(URL).await.unwrap(),
            Some(ContentClass::Rendered)
        );
        assert_eq!(f.repository.count().await.unwrap(), 1);
    }
}
