// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::utils::errors::WorkerError;
use async_trait::async_trait;
use tokio::sync::watch;

/// Worker trait定义
///
/// 所有后台工作器都必须实现此trait。`run` 在收到关闭信号后返回 `Ok(())`；
/// 返回错误表示循环因系统性故障退出，由管理器决定是否重启
#[async_trait]
pub trait Worker: Send + Sync {
    /// 运行工作器
    ///
    /// # 参数
    ///
    /// * `shutdown` - 关闭信号，值变为 `true` 时应尽快退出
    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), WorkerError>;

    /// 获取工作器名称
    fn name(&self) -> &str;
}
