// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 对所有队列后端执行同一组契约测试

use super::helpers::{crawl_task, manual_clock, Backend};
use crawlq::domain::models::task::{DeadLetterReason, QueueName, TaskStatus};
use crawlq::queue::task_queue::{
    CommitOutcome, CommitResult, EnqueueOutcome, LeaseIndex, Page, QueueAdmin, QueueError,
    QueueStore, TaskFilter,
};
use crawlq::utils::clock::Clock;
use std::time::Duration;
use uuid::Uuid;

const LEASE: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_enqueue_is_idempotent() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let task = crawl_task("https://a.test/");

        assert_eq!(store.enqueue(task.clone()).await.unwrap(), EnqueueOutcome::Enqueued);
        assert_eq!(store.enqueue(task.clone()).await.unwrap(), EnqueueOutcome::Duplicate);

        let (tasks, total) = store.list(&TaskFilter::default(), Page::default()).await.unwrap();
        assert_eq!(total, 1, "{:?}", backend);
        assert_eq!(tasks[0].id, task.id);

        // 被租用期间同样视为重复
        store.lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE).await.unwrap();
        assert_eq!(store.enqueue(task).await.unwrap(), EnqueueOutcome::Duplicate);
    }
}

#[tokio::test]
async fn test_completed_task_is_readmitted_and_dead_letter_is_rejected() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let task = crawl_task("https://a.test/");
        store.enqueue(task.clone()).await.unwrap();

        let (_, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        store.commit(&lease, CommitOutcome::Success).await.unwrap();
        assert_eq!(store.enqueue(task.clone()).await.unwrap(), EnqueueOutcome::Enqueued);

        let terminated = store.terminate(task.id).await.unwrap();
        assert_eq!(terminated.status, TaskStatus::DeadLettered);
        assert!(matches!(
            store.enqueue(task).await,
            Err(QueueError::DeadLettered(_))
        ), "{:?}", backend);
    }
}

#[tokio::test]
async fn test_priority_then_fifo_order() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let first = crawl_task("https://a.test/1");
        let second = crawl_task("https://a.test/2");
        let urgent = crawl_task("https://a.test/3").with_priority(5);

        for task in [first.clone(), second.clone(), urgent.clone()] {
            store.enqueue(task).await.unwrap();
            clock.advance(chrono::Duration::seconds(1));
        }

        let mut order = Vec::new();
        while let Some((task, _)) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
        {
            order.push(task.id);
        }
        assert_eq!(order, vec![urgent.id, first.id, second.id], "{:?}", backend);
    }
}

#[tokio::test]
async fn test_at_most_one_valid_lease() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        store.enqueue(crawl_task("https://a.test/")).await.unwrap();

        let a = store.clone();
        let b = store.clone();
        let (ra, rb) = tokio::join!(
            a.lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE),
            b.lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE),
        );
        let granted = [ra.unwrap(), rb.unwrap()]
            .into_iter()
            .filter(|r| r.is_some())
            .count();
        assert_eq!(granted, 1, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_stale_lease_cannot_commit_after_reclaim() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let task = crawl_task("https://a.test/");
        store.enqueue(task.clone()).await.unwrap();

        let (_, stale) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        clock.advance(chrono::Duration::seconds(6));
        assert!(matches!(
            store.commit(&stale, CommitOutcome::Success).await,
            Err(QueueError::LeaseExpired(_))
        ));

        let reclaimed = store.reclaim_expired(clock.now()).await.unwrap();
        assert_eq!(reclaimed.len(), 1, "{:?}", backend);

        let (_, fresh) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            store.commit(&stale, CommitOutcome::Success).await,
            Err(QueueError::LeaseLost(_))
        ));
        assert!(!store.check_lease(&stale).await.unwrap());
        assert!(store.check_lease(&fresh).await.unwrap());
        assert_eq!(
            store.commit(&fresh, CommitOutcome::Success).await.unwrap(),
            CommitResult::Completed
        );
    }
}

#[tokio::test]
async fn test_retry_backoff_and_exhaustion() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let task = crawl_task("https://a.test/").with_max_attempts(2);
        store.enqueue(task.clone()).await.unwrap();

        let (_, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        let not_before = clock.now() + chrono::Duration::seconds(10);
        let result = store
            .commit(
                &lease,
                CommitOutcome::Retry {
                    not_before,
                    error: "HTTP 503".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(result, CommitResult::Requeued { attempt_count: 1 });

        // 退避期间不可租用
        assert!(store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .is_none());
        clock.advance(chrono::Duration::seconds(10));
        let (retried, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.queue, QueueName::Retry, "{:?}", backend);

        let result = store
            .commit(
                &lease,
                CommitOutcome::Retry {
                    not_before: clock.now(),
                    error: "HTTP 503".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            CommitResult::DeadLettered {
                reason: DeadLetterReason::Exhausted
            }
        );
        let dead = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(dead.attempt_count, 2);
        assert_eq!(dead.queue, QueueName::DeadLetter);
    }
}

#[tokio::test]
async fn test_release_and_defer_keep_attempts() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let task = crawl_task("https://a.test/");
        store.enqueue(task.clone()).await.unwrap();

        let (_, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        store.release(&lease).await.unwrap();
        assert!(store.commit(&lease, CommitOutcome::Success).await.is_err());

        let (_, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        store
            .defer(&lease, clock.now() + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert!(store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .is_none());

        let after = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(after.attempt_count, 0, "{:?}", backend);
        assert_eq!(after.queue, QueueName::Frontier);
    }
}

#[tokio::test]
async fn test_renew_extends_lease() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        store.enqueue(crawl_task("https://a.test/")).await.unwrap();

        let (_, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        clock.advance(chrono::Duration::seconds(4));
        let renewed = store.renew(&lease, Duration::from_secs(5)).await.unwrap();
        assert_eq!(renewed.expires_at, clock.now() + chrono::Duration::seconds(5));

        clock.advance(chrono::Duration::seconds(3));
        assert!(store.reclaim_expired(clock.now()).await.unwrap().is_empty());
        assert!(store.check_lease(&renewed).await.unwrap(), "{:?}", backend);
    }
}

#[tokio::test]
async fn test_admin_requeue_and_delete() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let task = crawl_task("https://a.test/").with_max_attempts(1);
        store.enqueue(task.clone()).await.unwrap();

        let (_, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        store
            .commit(
                &lease,
                CommitOutcome::DeadLetter {
                    reason: DeadLetterReason::Permanent,
                    error: "HTTP 404".into(),
                },
            )
            .await
            .unwrap();

        let depths = store.depths().await.unwrap();
        let dead = depths.iter().find(|d| d.queue == QueueName::DeadLetter).unwrap();
        assert_eq!(dead.total(), 1, "{:?}", backend);

        let requeued = store.requeue(task.id).await.unwrap();
        assert_eq!(requeued.queue, QueueName::Frontier);
        assert_eq!(requeued.attempt_count, 0);
        assert!(matches!(
            store.requeue(task.id).await,
            Err(QueueError::InvalidTransition(_))
        ));

        store.delete(task.id).await.unwrap();
        assert!(store.get(task.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete(task.id).await,
            Err(QueueError::NotFound(_))
        ));
        assert_eq!(store.stats().await.unwrap().crawl.total(), 0);
    }
}

#[tokio::test]
async fn test_list_filters_and_paginates() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        for i in 0..5 {
            store
                .enqueue(crawl_task(&format!("https://a.test/{}", i)))
                .await
                .unwrap();
            clock.advance(chrono::Duration::seconds(1));
        }
        store.enqueue(crawl_task("https://b.test/")).await.unwrap();

        let filter = TaskFilter {
            domain: Some("a.test".to_string()),
            ..Default::default()
        };
        let (page, total) = store.list(&filter, Page::new(Some(2), Some(1))).await.unwrap();
        assert_eq!(total, 5, "{:?}", backend);
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|t| t.domain == "a.test"));

        let filter = TaskFilter {
            status: Some(TaskStatus::Leased),
            ..Default::default()
        };
        assert_eq!(store.list(&filter, Page::default()).await.unwrap().1, 0);
    }
}

#[tokio::test]
async fn test_stuck_ceiling_applies_to_leased_tasks_only() {
    for backend in Backend::ALL {
        let clock = manual_clock();
        let store = backend.build(clock.clone()).await;
        let hung = crawl_task("https://a.test/hung");
        let waiting = crawl_task("https://a.test/waiting");
        store.enqueue(hung.clone()).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        store.enqueue(waiting.clone()).await.unwrap();

        let (leased, _) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), Duration::from_secs(3 * 3600))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.id, hung.id);
        let (_, lease) = store
            .lease_pop(QueueName::Frontier, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        store
            .defer(&lease, clock.now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(2) + chrono::Duration::seconds(1));
        let moved = store
            .dead_letter_stuck(Duration::from_secs(2 * 3600), clock.now())
            .await
            .unwrap();
        assert_eq!(moved, vec![hung.id], "{:?}", backend);

        let dead = store.get(hung.id).await.unwrap().unwrap();
        assert_eq!(dead.dead_letter_reason, Some(DeadLetterReason::Stuck));
        let queued = store.get(waiting.id).await.unwrap().unwrap();
        assert_eq!(queued.status, TaskStatus::Queued);
        assert_eq!(queued.attempt_count, 0);
    }
}
