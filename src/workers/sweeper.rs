// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::queue::task_queue::{LeaseIndex, QueueAdmin, QueueBackend, QueueError};
use crate::utils::clock::Clock;
use crate::utils::errors::WorkerError;
use crate::workers::runner::sleep_or_shutdown;
use crate::workers::worker::Worker;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// 一次清扫的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 回到起始队列的任务数
    pub reclaimed: usize,
    /// 回收时尝试次数耗尽而进入死信队列的任务数
    pub exhausted: usize,
    /// 超过绝对时间上限被强制死信的任务数
    pub stuck: usize,
}

/// 卡住任务清扫器
///
/// 周期性地回收过期租约，并把持有租约超过绝对时间上限的任务移入死信队列
pub struct StuckTaskSweeper {
    queue: Arc<dyn QueueBackend>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    stuck_ceiling: Duration,
    max_store_failures: u32,
}

impl StuckTaskSweeper {
    /// 创建清扫器
    ///
    /// # 参数
    ///
    /// * `queue` - 队列后端
    /// * `clock` - 时钟
    /// * `interval` - 扫描间隔
    /// * `stuck_ceiling` - 任务从入队起的绝对时间上限
    /// * `max_store_failures` - 连续存储失败多少次后退出
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        stuck_ceiling: Duration,
        max_store_failures: u32,
    ) -> Self {
        Self {
            queue,
            clock,
            interval,
            stuck_ceiling,
            max_store_failures,
        }
    }

    /// 执行一次清扫
    ///
    /// 先回收过期租约再检查绝对时间上限，二者都基于同一时刻
    pub async fn sweep_once(&self) -> Result<SweepReport, QueueError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for reclaimed in self.queue.reclaim_expired(now).await? {
            if reclaimed.dead_lettered {
                report.exhausted += 1;
            } else {
                report.reclaimed += 1;
            }
        }
        report.stuck = self
            .queue
            .dead_letter_stuck(self.stuck_ceiling, now)
            .await?
            .len();

        metrics::counter!("crawlq_leases_reclaimed_total")
            .increment((report.reclaimed + report.exhausted) as u64);
        metrics::counter!("crawlq_tasks_stuck_total").increment(report.stuck as u64);
        self.record_depths().await;

        if report.reclaimed + report.exhausted + report.stuck > 0 {
            info!(
                reclaimed = report.reclaimed,
                exhausted = report.exhausted,
                stuck = report.stuck,
                "Sweep finished"
            );
        } else {
            debug!("Sweep found nothing to do");
        }
        Ok(report)
    }

    async fn record_depths(&self) {
        match self.queue.depths().await {
            Ok(depths) => {
                for depth in depths {
                    let queue = depth.queue.as_str();
                    for (state, value) in [
                        ("ready", depth.ready),
                        ("delayed", depth.delayed),
                        ("leased", depth.leased),
                    ] {
                        metrics::gauge!("crawlq_queue_depth", "queue" => queue, "state" => state)
                            .set(value as f64);
                    }
                }
            }
            Err(e) => debug!("Failed to read queue depths: {}", e),
        }
    }
}

#[async_trait]
impl Worker for StuckTaskSweeper {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(interval_secs = self.interval.as_secs(), "Stuck-task sweeper started");
        let mut failures = 0u32;

        loop {
            match self.sweep_once().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures += 1;
                    metrics::counter!("crawlq_store_errors_total", "worker" => "sweeper").increment(1);
                    if failures >= self.max_store_failures {
                        error!("Sweeper giving up after {} failures: {}", failures, e);
                        return Err(WorkerError::TooManyStoreFailures {
                            failures,
                            last: e.to_string(),
                        });
                    }
                    warn!(failures, "Sweep failed: {}", e);
                }
            }

            if sleep_or_shutdown(self.interval, &mut shutdown).await {
                info!("Stuck-task sweeper stopped");
                return Ok(());
            }
        }
    }

    fn name(&self) -> &str {
        "sweeper"
    }
}
