// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 测试主模块
///
/// 队列契约测试在内存与 SQLite 后端上运行，
/// 另外覆盖端到端场景、管理接口、抓取器与重爬调度
mod integration;
