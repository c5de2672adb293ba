// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 数据库实体模块
///
/// - task：四个逻辑队列共用的任务表
/// - url_record：URL 重爬记录表
pub mod task;
pub mod url_record;
