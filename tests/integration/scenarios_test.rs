// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 端到端场景：限流、回收、尝试上限、智能重爬与终止

use super::helpers::{crawl_task, manual_clock, sqlite_db, Backend};
use crawlq::config::settings::{RateLimitingSettings, RateLimiterBackendKind, Settings};
use crawlq::domain::models::recrawl::ContentClass;
use crawlq::domain::models::task::{DeadLetterReason, QueueName, TaskStatus, Validators};
use crawlq::domain::services::rate_limiting_service::RateLimiter;
use crawlq::domain::services::recrawl_service::RecrawlScheduler;
use crawlq::infrastructure::repositories::memory_url_record_repo::MemoryUrlRecordRepository;
use crawlq::infrastructure::repositories::url_record_repo_impl::SqlUrlRecordRepository;
use crawlq::domain::repositories::url_record_repository::UrlRecordRepository;
use crawlq::infrastructure::services::local_rate_limiter::LocalRateLimiter;
use crawlq::queue::task_queue::{CommitOutcome, CommitResult, QueueAdmin, QueueError, QueueStore};
use crawlq::utils::clock::Clock;
use crawlq::workers::sweeper::StuckTaskSweeper;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn limiter_settings(burst: u32, rate: f64, jitter_percent: f64) -> RateLimitingSettings {
    RateLimitingSettings {
        backend: RateLimiterBackendKind::Local,
        burst,
        requests_per_second: rate,
        jitter_percent,
        overrides: HashMap::new(),
    }
}

#[tokio::test]
async fn test_second_admit_is_denied_for_two_seconds() {
    let clock = manual_clock();
    let limiter = LocalRateLimiter::new(limiter_settings(1, 0.5, 0.0), clock.clone());

    let first = limiter.admit("a.test").await.unwrap();
    assert!(first.allowed);

    let second = limiter.admit("a.test").await.unwrap();
    assert!(!second.allowed);
    let secs = second.retry_after.as_secs_f64();
    assert!((secs - 2.0).abs() < 0.01, "retry_after = {}", secs);
}

#[tokio::test]
async fn test_saturated_domain_does_not_affect_other_domain() {
    let clock = manual_clock();
    let limiter = Arc::new(LocalRateLimiter::new(limiter_settings(2, 0.5, 20.0), clock.clone()));

    for _ in 0..50 {
        limiter.admit("a.test").await.unwrap();
    }
    let b = limiter.admit("b.test").await.unwrap();
    assert!(b.allowed);
    assert_eq!(b.retry_after, Duration::ZERO);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move { limiter.admit("c.test").await.unwrap() }));
    }
    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap().allowed {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 2);
}

#[tokio::test]
async fn test_abandoned_lease_returns_to_frontier() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let task = crawl_task("https://a.test/");
        store.enqueue(task.clone()).await.unwrap();

        store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        clock.advance(chrono::Duration::seconds(6));

        let sweeper = StuckTaskSweeper::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(60),
            Duration::from_secs(7200),
            3,
        );
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.reclaimed, 1, "{:?}", backend);

        let back = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(back.queue, QueueName::Frontier);
        assert_eq!(back.status, TaskStatus::Queued);
        assert_eq!(back.attempt_count, 1);

        // 回收后的任务最终可以完成
        let (_, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            store.commit(&lease, CommitOutcome::Success).await.unwrap(),
            CommitResult::Completed
        );
    }
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let task = crawl_task("https://a.test/").with_max_attempts(2);
        store.enqueue(task.clone()).await.unwrap();

        for _ in 0..2 {
            let (_, lease) = store
                .lease_pop(QueueName::Frontier, Uuid::new_v4(), Duration::from_secs(5))
                .await
                .unwrap()
                .unwrap();
            store
                .commit(
                    &lease,
                    CommitOutcome::Retry {
                        not_before: clock.now(),
                        error: "timeout".into(),
                    },
                )
                .await
                .unwrap();
        }

        assert!(store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), Duration::from_secs(5))
            .await
            .unwrap()
            .is_none());
        let dead = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(dead.status, TaskStatus::DeadLettered, "{:?}", backend);
        assert_eq!(dead.dead_letter_reason, Some(DeadLetterReason::Exhausted));
        assert!(dead.attempt_count <= dead.max_attempts);
    }
}

async fn assert_unchanged_content_lengthens_interval(repository: Arc<dyn UrlRecordRepository>) {
    let clock = manual_clock();
    let store = Backend::Memory.build(clock.clone()).await;
    let mut settings = Settings::defaults().unwrap().recrawl;
    settings.static_interval_secs = 48 * 3600;
    settings.smart_adjustment = true;

    let scheduler = RecrawlScheduler::new(
        repository,
        store,
        clock.clone(),
        settings.policies(),
        Duration::from_secs(7200),
        3,
    );

    let first = scheduler
        .record_completion("https://a.test/", "a.test", ContentClass::Static, "h1", Validators::default())
        .await
        .unwrap();
    let first_interval = first.next_eligible_at.unwrap() - first.last_crawled_at.unwrap();
    assert_eq!(first_interval, chrono::Duration::hours(48));

    clock.advance(chrono::Duration::hours(48));
    let second = scheduler
        .record_completion("https://a.test/", "a.test", ContentClass::Static, "h1", Validators::default())
        .await
        .unwrap();
    let second_interval = second.next_eligible_at.unwrap() - second.last_crawled_at.unwrap();
    assert!(second_interval > first_interval);
    assert_eq!(second_interval, chrono::Duration::hours(72));
}

#[tokio::test]
async fn test_unchanged_content_lengthens_recrawl_interval() {
    assert_unchanged_content_lengthens_interval(Arc::new(MemoryUrlRecordRepository::new())).await;
    assert_unchanged_content_lengthens_interval(Arc::new(SqlUrlRecordRepository::new(
        sqlite_db().await,
    )))
    .await;
}

#[tokio::test]
async fn test_terminate_revokes_active_lease() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let task = crawl_task("https://a.test/");
        store.enqueue(task.clone()).await.unwrap();

        let (_, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        store.terminate(task.id).await.unwrap();

        let result = store.commit(&lease, CommitOutcome::Success).await;
        assert!(matches!(result, Err(QueueError::LeaseLost(_))), "{:?}", backend);
        assert!(!store.check_lease(&lease).await.unwrap());

        let dead = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(dead.status, TaskStatus::DeadLettered);
        assert_eq!(dead.queue, QueueName::DeadLetter);
        assert_eq!(dead.dead_letter_reason, Some(DeadLetterReason::Terminated));
    }
}
