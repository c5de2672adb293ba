// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工具模块
///
/// 提供时钟、退避策略、遥测初始化与 URL 辅助函数
pub mod clock;
pub mod errors;
pub mod retry_policy;
pub mod telemetry;
pub mod url_utils;
