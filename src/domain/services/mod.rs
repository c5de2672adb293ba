// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// - 限流服务（rate_limiting_service）：每域名令牌桶准入控制
/// - 重爬服务（recrawl_service）：根据内容分类与变化历史决定重爬时间
/// - 管理服务（admin_service）：供管理界面使用的查询与变更操作
/// - 外部协作者（fetcher、parser、result_sink）：抓取、解析与结果存储的接口
pub mod admin_service;
pub mod fetcher;
pub mod parser;
pub mod rate_limiting_service;
pub mod recrawl_service;
pub mod result_sink;
