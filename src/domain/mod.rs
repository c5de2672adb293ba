// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 该模块包含调度子系统的核心业务逻辑，包括：
/// - 领域模型（models）：任务、租约、域名限流状态、重爬记录与统计
/// - 仓库接口（repositories）：重爬记录的持久化抽象
/// - 服务（services）：限流、重爬调度、管理操作与外部协作者接口
///
/// 领域层不依赖于任何具体的队列后端或存储实现。
pub mod models;
pub mod repositories;
pub mod services;
