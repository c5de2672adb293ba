// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供后台任务处理和工作器管理功能，
/// 包括抓取与解析循环、清扫器、重爬调度和工作器监督
pub mod crawl_worker;
pub mod manager;
pub mod parse_worker;
pub mod recrawl_worker;
pub mod runner;
pub mod sweeper;
pub mod worker;

pub use worker::Worker;
