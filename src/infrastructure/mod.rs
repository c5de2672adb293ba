// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 提供领域层与队列契约的具体实现：
/// - 缓存（cache）：Redis客户端
/// - 数据库（database）：连接池与实体映射
/// - 抓取器（fetcher）：基于 reqwest 的 HTTP 抓取
/// - 指标（metrics）：Prometheus 导出
/// - 解析器（parser）与结果存储（storage）
/// - 队列（queue）：内存、SQL 与 Redis 三种队列后端
/// - 仓库实现（repositories）：URL 重爬记录的内存与数据库实现
/// - 服务（services）：本地与 Redis 令牌桶限流器
pub mod cache;
pub mod database;
pub mod fetcher;
pub mod metrics;
pub mod parser;
pub mod queue;
pub mod repositories;
pub mod services;
pub mod storage;
