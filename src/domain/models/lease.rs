// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// 租约
///
/// 将任务在有限时间内绑定到某个工作者。`token` 在每次租用时随机生成，
/// 存储只接受与当前有效租约令牌一致的提交、释放和续约。
/// 过期只是逻辑截止时间，工作者在产生外部副作用前需要重新校验。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// 任务ID
    pub task_id: Uuid,
    /// 持有者ID
    pub worker_id: Uuid,
    /// 租约令牌
    pub token: Uuid,
    /// 获取时间
    pub acquired_at: DateTime<Utc>,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// 创建新租约
    ///
    /// # 参数
    ///
    /// * `task_id` - 任务ID
    /// * `worker_id` - 工作者ID
    /// * `now` - 当前时间
    /// * `duration` - 租约时长
    pub fn grant(task_id: Uuid, worker_id: Uuid, now: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            task_id,
            worker_id,
            token: Uuid::new_v4(),
            acquired_at: now,
            expires_at: now + to_chrono(duration),
        }
    }

    /// 租约在 `now` 是否尚未过期
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// 剩余时长，过期后为零
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// 将标准库时长转换为 chrono 时长，溢出时取一百年
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(5200))
}
