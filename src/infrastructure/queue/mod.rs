// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列后端实现
///
/// - memory：进程内参考实现，按条目比较并交换
/// - sql：基于 sea-orm 的持久化实现（Postgres / SQLite）
/// - redis：有序集合 + Lua 脚本的消息代理式实现
pub mod memory;
pub mod redis;
pub mod sql;
