// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::services::recrawl_service::RecrawlScheduler;
use crate::utils::errors::WorkerError;
use crate::workers::runner::sleep_or_shutdown;
use crate::workers::worker::Worker;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 重爬调度工作器
///
/// 按固定间隔扫描到期的 URL 记录并重新放入 frontier
pub struct RecrawlWorker {
    scheduler: Arc<RecrawlScheduler>,
    interval: Duration,
    batch_size: u64,
    max_store_failures: u32,
}

impl RecrawlWorker {
    pub fn new(
        scheduler: Arc<RecrawlScheduler>,
        interval: Duration,
        batch_size: u64,
        max_store_failures: u32,
    ) -> Self {
        Self {
            scheduler,
            interval,
            batch_size,
            max_store_failures,
        }
    }
}

#[async_trait]
impl Worker for RecrawlWorker {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Recrawl scheduler started"
        );
        let mut failures = 0u32;

        loop {
            match self.scheduler.readmit_due(self.batch_size).await {
                Ok(_) => failures = 0,
                Err(e) if e.is_systemic() => {
                    failures += 1;
                    metrics::counter!("crawlq_store_errors_total", "worker" => "recrawl").increment(1);
                    if failures >= self.max_store_failures {
                        error!("Recrawl scheduler giving up after {} failures: {}", failures, e);
                        return Err(WorkerError::TooManyStoreFailures {
                            failures,
                            last: e.to_string(),
                        });
                    }
                    warn!(failures, "Recrawl scan failed: {}", e);
                }
                Err(e) => warn!("Recrawl scan failed: {}", e),
            }

            if sleep_or_shutdown(self.interval, &mut shutdown).await {
                info!("Recrawl scheduler stopped");
                return Ok(());
            }
        }
    }

    fn name(&self) -> &str {
        "recrawl"
    }
}
