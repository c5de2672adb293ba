// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::services::admin_service::AdminService;
use crate::presentation::errors::AppError;
use crate::presentation::handlers::{admin_handler, seed_handler};
use crate::queue::task_queue::{QueueBackend, QueueStore};
use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// 创建应用路由
///
/// # 参数
///
/// * `admin` - 管理服务
/// * `queue` - 队列后端，用于健康检查
///
/// # 返回值
///
/// 返回配置好的路由
pub fn routes(admin: Arc<AdminService>, queue: Arc<dyn QueueBackend>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version));

    let admin_routes = Router::new()
        .route("/v1/seeds", post(seed_handler::submit_seeds))
        .route("/v1/admin/tasks", get(admin_handler::list_tasks))
        .route(
            "/v1/admin/tasks/{id}",
            get(admin_handler::get_task).delete(admin_handler::delete_task),
        )
        .route(
            "/v1/admin/tasks/{id}/terminate",
            post(admin_handler::terminate_task),
        )
        .route(
            "/v1/admin/tasks/{id}/requeue",
            post(admin_handler::requeue_task),
        )
        .route("/v1/admin/stats", get(admin_handler::stats))
        .route("/v1/admin/queues", get(admin_handler::queue_depths))
        .route("/v1/admin/dead-letter", get(admin_handler::dead_letters))
        .route("/v1/admin/rate-limits", get(admin_handler::rate_limits));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(admin))
                .layer(Extension(queue)),
        )
}

/// 健康检查端点
///
/// 队列后端不可用时返回 500
pub async fn health_check(
    Extension(queue): Extension<Arc<dyn QueueBackend>>,
) -> Result<&'static str, AppError> {
    queue.ping().await?;
    Ok("OK")
}

/// 版本信息端点
///
/// # 返回值
///
/// 返回应用版本号
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
