// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 初始化指标系统
///
/// 安装 Prometheus 记录器并在 `listen` 上暴露抓取端点，安装失败只记录警告
///
/// # 参数
///
/// * `listen` - 监听地址，例如 `0.0.0.0:9000`
pub fn init_metrics(listen: &str) {
    let addr: SocketAddr = match listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics listen address {}: {}", listen, e);
            return;
        }
    };

    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!("Prometheus exporter listening on {}", addr),
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
            return;
        }
    }

    describe_metrics();
}

fn describe_metrics() {
    describe_counter!("crawlq_tasks_enqueued_total", "Tasks admitted into a queue");
    describe_counter!("crawlq_tasks_leased_total", "Leases granted per queue");
    describe_counter!(
        "crawlq_tasks_committed_total",
        "Task results committed, labelled by kind and resulting state"
    );
    describe_histogram!(
        "crawlq_task_duration_seconds",
        "Time spent executing a leased task"
    );
    describe_counter!(
        "crawlq_rate_limit_denied_total",
        "Fetch attempts deferred by the per-domain token bucket"
    );
    describe_counter!(
        "crawlq_leases_reclaimed_total",
        "Expired leases returned to their queue or dead-lettered by the sweeper"
    );
    describe_counter!(
        "crawlq_tasks_stuck_total",
        "Tasks force-moved to the dead letter queue after exceeding the age ceiling"
    );
    describe_counter!(
        "crawlq_recrawl_readmitted_total",
        "URLs re-admitted to the frontier by the recrawl scheduler"
    );
    describe_counter!("crawlq_lease_lost_total", "Commits rejected because the lease was lost");
    describe_counter!("crawlq_store_errors_total", "Queue store failures observed by workers");
    describe_counter!("crawlq_worker_restarts_total", "Worker loops restarted by the supervisor");
    describe_gauge!("crawlq_queue_depth", "Tasks per queue and state");
}
