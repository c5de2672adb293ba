// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crawlq::config::settings::Settings;
use crawlq::domain::models::task::TaskKind;
use crawlq::domain::services::admin_service::AdminService;
use crawlq::domain::services::recrawl_service::RecrawlScheduler;
use crawlq::infrastructure::fetcher::http_fetcher::HttpFetcher;
use crawlq::infrastructure::metrics;
use crawlq::infrastructure::parser::PassthroughParser;
use crawlq::infrastructure::storage::LocalResultSink;
use crawlq::presentation::routes;
use crawlq::queue::factory::build_backends;
use crawlq::utils::clock::{Clock, SystemClock};
use crawlq::utils::retry_policy::RetryPolicy;
use crawlq::utils::telemetry;
use crawlq::workers::crawl_worker::CrawlHandler;
use crawlq::workers::manager::WorkerManager;
use crawlq::workers::parse_worker::ParseHandler;
use crawlq::workers::recrawl_worker::RecrawlWorker;
use crawlq::workers::runner::{LoopSettings, PollingWorker};
use crawlq::workers::sweeper::StuckTaskSweeper;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use validator::Validate;

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting crawlq...");

    // 2. Load configuration
    let settings = Settings::new()?;
    settings.validate()?;
    info!(
        backend = ?settings.queue.backend,
        limiter = ?settings.rate_limiting.backend,
        "Configuration loaded"
    );

    if settings.metrics.enabled {
        metrics::init_metrics(&settings.metrics.listen);
    }

    // 3. Queue, rate limiter and url records
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = build_backends(&settings, clock.clone()).await?;
    let queue = backends.queue.clone();
    info!("Queue backend ready");

    let retry_policy = RetryPolicy::new(settings.retry.base_delay(), settings.retry.max_delay());

    let recrawl = settings.recrawl.enabled.then(|| {
        Arc::new(RecrawlScheduler::new(
            backends.url_records.clone(),
            queue.clone(),
            clock.clone(),
            settings.recrawl.policies(),
            settings.sweeper.stuck_ceiling(),
            settings.retry.max_attempts,
        ))
    });

    // 4. Workers
    let mut manager = WorkerManager::new(settings.workers.restart_delay());
    let loop_settings = |kind| LoopSettings {
        lease_duration: settings.lease.duration_for(kind),
        poll_interval: settings.workers.poll_interval(),
        max_store_failures: settings.workers.max_store_failures,
    };

    let crawl_handler = Arc::new(CrawlHandler::new(
        backends.limiter.clone(),
        Arc::new(HttpFetcher::new(&settings.fetcher)?),
        recrawl.clone(),
        retry_policy.clone(),
        settings.workers.max_depth,
        settings.workers.poll_interval(),
    ));
    for i in 0..settings.workers.crawl_concurrency {
        manager.spawn(Arc::new(PollingWorker::new(
            format!("crawl-{}", i),
            queue.clone(),
            clock.clone(),
            crawl_handler.clone(),
            loop_settings(TaskKind::Crawl),
        )));
    }

    let parse_handler = Arc::new(ParseHandler::new(
        Arc::new(PassthroughParser::new()?),
        Arc::new(LocalResultSink::new(&settings.sink.directory)),
        retry_policy,
    ));
    for i in 0..settings.workers.parse_concurrency {
        manager.spawn(Arc::new(PollingWorker::new(
            format!("parse-{}", i),
            queue.clone(),
            clock.clone(),
            parse_handler.clone(),
            loop_settings(TaskKind::Parse),
        )));
    }

    manager.spawn(Arc::new(StuckTaskSweeper::new(
        queue.clone(),
        clock.clone(),
        settings.sweeper.interval(),
        settings.sweeper.stuck_ceiling(),
        settings.workers.max_store_failures,
    )));

    if let Some(recrawl) = recrawl {
        manager.spawn(Arc::new(RecrawlWorker::new(
            recrawl,
            settings.recrawl.scan_interval(),
            settings.recrawl.batch_size,
            settings.workers.max_store_failures,
        )));
    }
    info!("Started {} workers", manager.len());

    // 5. Start HTTP server
    let admin = Arc::new(AdminService::new(
        queue.clone(),
        backends.limiter.clone(),
        settings.retry.max_attempts,
    ));
    let app = routes::routes(admin, queue);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let mut server_shutdown = manager.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    manager.wait_for_shutdown().await;
    server.await??;
    info!("crawlq stopped");
    Ok(())
}
