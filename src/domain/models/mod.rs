// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// - 任务（task）：调度的工作单元及其负载
/// - 租约（lease）：任务与工作者之间的限时所有权
/// - 限流状态（rate_limit）：每个域名的令牌桶
/// - 重爬（recrawl）：内容分类策略与 URL 记录
/// - 统计（stats）：管理界面使用的聚合视图
pub mod lease;
pub mod rate_limit;
pub mod recrawl;
pub mod stats;
pub mod task;
