// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理调度子系统的配置：队列后端、限流、租约、重试、工作者、清扫器与重爬策略
pub mod settings;
