// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::services::admin_service::{AdminService, Seed, SeedResult};
use crate::presentation::errors::AppError;
use axum::{extract::Extension, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use validator::Validate;

/// 单个种子
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SeedDto {
    #[validate(url)]
    pub url: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// 种子提交请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SeedRequestDto {
    #[validate(length(min = 1, max = 1000), nested)]
    pub seeds: Vec<SeedDto>,
}

/// 种子提交响应
#[derive(Debug, Serialize)]
pub struct SeedResponseDto {
    pub enqueued: usize,
    pub results: Vec<SeedResult>,
}

/// 提交种子URL
///
/// # 参数
///
/// * `admin` - 管理服务
/// * `payload` - 种子列表
///
/// # 返回值
///
/// 返回 202 与每个种子的入队结果
pub async fn submit_seeds(
    Extension(admin): Extension<Arc<AdminService>>,
    Json(payload): Json<SeedRequestDto>,
) -> Result<(StatusCode, Json<SeedResponseDto>), AppError> {
    payload.validate()?;

    let seeds = payload
        .seeds
        .into_iter()
        .map(|s| Seed {
            url: s.url,
            priority: s.priority,
            headers: s.headers,
        })
        .collect();
    let results = admin.admit_seeds(seeds).await?;
    let enqueued = results.iter().filter(|r| r.status == "enqueued").count();

    Ok((
        StatusCode::ACCEPTED,
        Json(SeedResponseDto { enqueued, results }),
    ))
}
