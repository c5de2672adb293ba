// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

/// Worker错误类型
///
/// 只有系统性错误会让工作循环退出，由管理器负责重启
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("连续 {failures} 次队列存储失败: {last}")]
    TooManyStoreFailures { failures: u32, last: String },
}
