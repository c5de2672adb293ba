// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// 时钟特质
///
/// 所有与时间相关的组件（队列存储、限流器、清扫器、重爬调度器）
/// 都通过该特质读取当前时间，便于测试中推进时间。
pub trait Clock: Send + Sync {
    /// 当前时间
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟
///
/// 只有在调用 `set` 或 `advance` 时才会变化
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// 创建新的手动时钟
    ///
    /// # 参数
    ///
    /// * `start` - 初始时间
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// 设置当前时间
    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock() = at;
    }

    /// 将时钟向前推进
    ///
    /// # 参数
    ///
    /// * `by` - 推进的时长
    pub fn advance(&self, by: chrono::Duration) {
        let mut current = self.current.lock();
        *current += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}
