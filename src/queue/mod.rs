// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 定义四个逻辑队列（frontier、parse、retry、dead_letter）的存储契约、
/// 与后端无关的租约/重试规则，以及按配置选择后端的工厂
pub mod factory;
pub mod rules;
pub mod task_queue;

#[cfg(test)]
pub(crate) mod testing;
