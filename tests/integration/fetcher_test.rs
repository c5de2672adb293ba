// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::manual_clock;
use crawlq::config::settings::{FetcherSettings, Settings};
use crawlq::domain::models::recrawl::ContentClass;
use crawlq::domain::models::task::{CrawlPayload, QueueName, Task, TaskStatus, Validators};
use crawlq::domain::services::fetcher::Fetcher;
use crawlq::infrastructure::fetcher::http_fetcher::{content_hash, HttpFetcher};
use crawlq::infrastructure::queue::memory::MemoryQueueStore;
use crawlq::infrastructure::services::local_rate_limiter::LocalRateLimiter;
use crawlq::queue::task_queue::{QueueAdmin, QueueBackend, QueueStore};
use crawlq::utils::retry_policy::RetryPolicy;
use crawlq::workers::crawl_worker::CrawlHandler;
use crawlq::workers::runner::{LoopSettings, PollingWorker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = r#"<html><head><title>Home</title></head>
<body><p>Welcome</p><a href="/about">About</a><a href="/about#team">Team</a>
<a href="mailto:x@a.test">Mail</a></body></html>"#;

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(&FetcherSettings {
        user_agent: "crawlq-test".to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

#[tokio::test]
async fn test_fetch_extracts_links_and_validators() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(PAGE, "text/html")
                .insert_header("ETag", "\"v1\""),
        )
        .mount(&server)
        .await;

    let url = format!("{}/", server.uri());
    let page = fetcher().fetch(&url, &CrawlPayload::default()).await.unwrap();

    assert!(!page.not_modified);
    assert_eq!(page.links, vec![format!("{}/about", server.uri())]);
    assert_eq!(page.content_class, ContentClass::Static);
    assert_eq!(page.content_hash, content_hash(PAGE));
    assert_eq!(page.validators.etag.as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn test_conditional_fetch_returns_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let payload = CrawlPayload {
        validators: Validators {
            etag: Some("\"v1\"".to_string()),
            last_modified: None,
            content_hash: Some("abc".to_string()),
        },
        ..Default::default()
    };
    let page = fetcher()
        .fetch(&format!("{}/", server.uri()), &payload)
        .await
        .unwrap();
    assert!(page.not_modified);
    assert_eq!(page.content_hash, "abc");
    assert!(page.body.is_empty());
}

#[tokio::test]
async fn test_error_classification() {
    let server = MockServer::start().await;
    for (route, status) in [("/gone", 404), ("/busy", 503), ("/slow-down", 429)] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 8], "image/png"))
        .mount(&server)
        .await;

    let fetcher = fetcher();
    let payload = CrawlPayload::default();
    let fetch = |route: &str| format!("{}{}", server.uri(), route);

    assert!(fetcher.fetch(&fetch("/gone"), &payload).await.unwrap_err().is_permanent());
    assert!(!fetcher.fetch(&fetch("/busy"), &payload).await.unwrap_err().is_permanent());
    assert!(!fetcher.fetch(&fetch("/slow-down"), &payload).await.unwrap_err().is_permanent());
    assert!(fetcher.fetch(&fetch("/logo.png"), &payload).await.unwrap_err().is_permanent());
}

#[tokio::test]
async fn test_crawl_worker_against_live_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE, "text/html"))
        .mount(&server)
        .await;

    let clock = manual_clock();
    let settings = Settings::defaults().unwrap();
    let queue: Arc<dyn QueueBackend> = Arc::new(MemoryQueueStore::new(clock.clone()));
    let handler = CrawlHandler::new(
        Arc::new(LocalRateLimiter::new(settings.rate_limiting.clone(), clock.clone())),
        Arc::new(fetcher()),
        None,
        RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
        3,
        Duration::from_millis(100),
    );
    let worker = PollingWorker::new(
        "crawl-live",
        queue.clone(),
        clock,
        Arc::new(handler),
        LoopSettings {
            lease_duration: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
            max_store_failures: 3,
        },
    );

    let seed = Task::crawl(format!("{}/", server.uri()), &CrawlPayload::default()).unwrap();
    queue.enqueue(seed.clone()).await.unwrap();
    let (_tx, rx) = watch::channel(false);
    assert!(worker.run_once(&rx).await.unwrap());

    assert_eq!(
        queue.get(seed.id).await.unwrap().unwrap().status,
        TaskStatus::Completed
    );
    let about = format!("{}/about", server.uri());
    let child = queue.get(Task::id_for_url(&about)).await.unwrap().unwrap();
    assert_eq!(child.queue, QueueName::Frontier);

    let depths = queue.depths().await.unwrap();
    let parse = depths.iter().find(|d| d.queue == QueueName::Parse).unwrap();
    assert_eq!(parse.ready, 1);
}
