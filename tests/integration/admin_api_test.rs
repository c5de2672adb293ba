// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{crawl_task, manual_clock};
use axum::http::StatusCode;
use axum_test::TestServer;
use crawlq::config::settings::Settings;
use crawlq::domain::models::task::{QueueName, Task};
use crawlq::domain::services::admin_service::AdminService;
use crawlq::infrastructure::queue::memory::MemoryQueueStore;
use crawlq::infrastructure::services::local_rate_limiter::LocalRateLimiter;
use crawlq::domain::services::rate_limiting_service::RateLimiter;
use crawlq::presentation::routes;
use crawlq::queue::task_queue::{QueueBackend, QueueStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct TestApp {
    server: TestServer,
    queue: Arc<dyn QueueBackend>,
    limiter: Arc<LocalRateLimiter>,
}

fn create_test_app() -> TestApp {
    let clock = manual_clock();
    let settings = Settings::defaults().unwrap();
    let queue: Arc<dyn QueueBackend> = Arc::new(MemoryQueueStore::new(clock.clone()));
    let limiter = Arc::new(LocalRateLimiter::new(settings.rate_limiting.clone(), clock));
    let admin = Arc::new(AdminService::new(queue.clone(), limiter.clone(), 3));
    let server = TestServer::new(routes::routes(admin, queue.clone())).unwrap();
    TestApp {
        server,
        queue,
        limiter,
    }
}

#[tokio::test]
async fn test_health_and_version() {
    let app = create_test_app();
    let response = app.server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");

    let response = app.server.get("/v1/version").await;
    response.assert_text(env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_submit_seeds_deduplicates() {
    let app = create_test_app();
    let body = json!({
        "seeds": [
            { "url": "https://a.test/", "priority": 2 },
            { "url": "https://a.test/" },
        ]
    });

    let response = app.server.post("/v1/seeds").json(&body).await;
    response.assert_status(StatusCode::ACCEPTED);
    let result: Value = response.json();
    assert_eq!(result["enqueued"], 1);
    assert_eq!(result["results"][1]["status"], "duplicate");

    let id = Task::id_for_url("https://a.test/");
    let response = app.server.get(&format!("/v1/admin/tasks/{}", id)).await;
    response.assert_status_ok();
    let task: Value = response.json();
    assert_eq!(task["priority"], 2);
    assert_eq!(task["queue"], "frontier");
}

#[tokio::test]
async fn test_invalid_seed_request_is_rejected() {
    let app = create_test_app();
    let response = app
        .server
        .post("/v1/seeds")
        .json(&json!({ "seeds": [] }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = app
        .server
        .post("/v1/seeds")
        .json(&json!({ "seeds": [{ "url": "not a url" }] }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_tasks_with_filters() {
    let app = create_test_app();
    for url in ["https://a.test/1", "https://a.test/2", "https://b.test/"] {
        app.queue.enqueue(crawl_task(url)).await.unwrap();
    }

    let response = app
        .server
        .get("/v1/admin/tasks")
        .add_query_param("domain", "a.test")
        .add_query_param("queue", "frontier")
        .add_query_param("limit", 1)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["total"], 2);
    assert_eq!(body["tasks"].as_array().unwrap().len(), 1);

    let response = app
        .server
        .get("/v1/admin/tasks")
        .add_query_param("status", "exploded")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_terminate_requeue_delete_flow() {
    let app = create_test_app();
    let task = crawl_task("https://a.test/");
    app.queue.enqueue(task.clone()).await.unwrap();
    app.queue
        .lease_pop(QueueName::Frontier, Uuid::new_v4(), Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let response = app
        .server
        .post(&format!("/v1/admin/tasks/{}/terminate", task.id))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "dead_lettered");
    assert_eq!(body["dead_letter_reason"], "terminated");

    let response = app.server.get("/v1/admin/dead-letter").await;
    let body: Value = response.json();
    assert_eq!(body["total"], 1);

    let response = app.server.get("/v1/admin/stats").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["dead_letter"], 1);
    assert_eq!(body["jobs"]["crawl"]["dead_lettered"], 1);

    let response = app
        .server
        .post(&format!("/v1/admin/tasks/{}/requeue", task.id))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["queue"], "frontier");
    assert_eq!(body["attempt_count"], 0);

    // 只有死信任务可以重新入队
    app.server
        .post(&format!("/v1/admin/tasks/{}/requeue", task.id))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .delete(&format!("/v1/admin/tasks/{}", task.id))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.server
        .get(&format!("/v1/admin/tasks/{}", task.id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .delete(&format!("/v1/admin/tasks/{}", task.id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_queue_depths_and_rate_limits() {
    let app = create_test_app();
    app.queue.enqueue(crawl_task("https://a.test/")).await.unwrap();
    app.limiter.admit("b.test").await.unwrap();
    app.limiter.admit("a.test").await.unwrap();

    let depths: Value = app.server.get("/v1/admin/queues").await.json();
    let depths = depths.as_array().unwrap();
    assert_eq!(depths.len(), 4);
    assert_eq!(depths[0]["queue"], "frontier");
    assert_eq!(depths[0]["ready"], 1);

    let limits: Value = app.server.get("/v1/admin/rate-limits").await.json();
    let limits = limits.as_array().unwrap();
    assert_eq!(limits.len(), 2);
    assert_eq!(limits[0]["domain"], "a.test");
    assert_eq!(limits[0]["capacity"], 5.0);
}
