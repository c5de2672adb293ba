// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::workers::runner::sleep_or_shutdown;
use crate::workers::worker::Worker;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 工作管理器
///
/// 为每个工作器启动一个监督任务：工作器因错误或 panic 退出时，
/// 等待重启延迟后重新运行，直到收到关闭信号
pub struct WorkerManager {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    restart_delay: Duration,
}

impl WorkerManager {
    /// 创建工作管理器
    ///
    /// # 参数
    ///
    /// * `restart_delay` - 工作器退出后重新启动前的等待时间
    pub fn new(restart_delay: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
            restart_delay,
        }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 已启动的工作器数量
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 在监督下启动工作器
    pub fn spawn(&mut self, worker: Arc<dyn Worker>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let restart_delay = self.restart_delay;

        let handle = tokio::spawn(async move {
            let name = worker.name().to_string();
            loop {
                let runner = worker.clone();
                let rx = shutdown.clone();
                let exit = tokio::spawn(async move { runner.run(rx).await }).await;

                if *shutdown.borrow() {
                    break;
                }
                match exit {
                    Ok(Ok(())) => warn!(worker = %name, "Worker exited without shutdown signal"),
                    Ok(Err(e)) => error!(worker = %name, "Worker failed: {}", e),
                    Err(e) => error!(worker = %name, "Worker panicked: {}", e),
                }
                metrics::counter!("crawlq_worker_restarts_total", "worker" => name.clone())
                    .increment(1);

                if sleep_or_shutdown(restart_delay, &mut shutdown).await {
                    break;
                }
                info!(worker = %name, "Restarting worker");
            }
        });
        self.handles.push(handle);
    }

    /// 发送关闭信号并等待所有工作器退出
    ///
    /// 工作器完成当前任务（或归还租约）后退出
    pub async fn shutdown(&mut self) {
        info!("Shutting down {} workers...", self.handles.len());
        let _ = self.shutdown_tx.send(true);
        for result in join_all(self.handles.drain(..)).await {
            if let Err(e) = result {
                error!("Worker supervisor failed: {}", e);
            }
        }
        info!("Workers shut down successfully");
    }

    /// 等待关闭信号并关闭工作进程
    pub async fn wait_for_shutdown(&mut self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::WorkerError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 前两次运行失败，之后等待关闭信号
    struct Flaky {
        runs: AtomicU32,
    }

    #[async_trait]
    impl Worker for Flaky {
        async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < 2 {
                return Err(WorkerError::TooManyStoreFailures {
                    failures: run + 1,
                    last: "connection refused".to_string(),
                });
            }
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_failed_worker_is_restarted() {
        let worker = Arc::new(Flaky {
            runs: AtomicU32::new(0),
        });
        let mut manager = WorkerManager::new(Duration::from_millis(5));
        manager.spawn(worker.clone());

        for _ in 0..200 {
            if worker.runs.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(worker.runs.load(Ordering::SeqCst), 3);

        manager.shutdown().await;
        assert!(manager.is_empty());
        assert_eq!(worker.runs.load(Ordering::SeqCst), 3);
    }
}
