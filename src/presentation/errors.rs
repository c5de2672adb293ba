// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::models::task::DomainError;
use crate::domain::services::admin_service::AdminError;
use crate::queue::task_queue::QueueError;

/// 应用错误类型
///
/// 封装所有可能的应用层错误，提供统一的错误处理接口
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    /// 请求参数错误
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(DomainError::ValidationError(message.into()).into())
    }

    fn status(&self) -> StatusCode {
        if let Some(err) = self.0.downcast_ref::<AdminError>() {
            return match err {
                AdminError::Queue(e) => queue_status(e),
                AdminError::Domain(_) => StatusCode::BAD_REQUEST,
                AdminError::RateLimit(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
        }
        if let Some(err) = self.0.downcast_ref::<QueueError>() {
            return queue_status(err);
        }
        if self.0.downcast_ref::<DomainError>().is_some()
            || self.0.downcast_ref::<validator::ValidationErrors>().is_some()
        {
            return StatusCode::BAD_REQUEST;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn queue_status(err: &QueueError) -> StatusCode {
    match err {
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
        QueueError::DeadLettered(_) | QueueError::LeaseLost(_) | QueueError::LeaseExpired(_) => {
            StatusCode::CONFLICT
        }
        QueueError::Store(_) | QueueError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.0);
        }
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let id = Uuid::new_v4();
        let cases = [
            (AppError::from(AdminError::Queue(QueueError::NotFound(id))), StatusCode::NOT_FOUND),
            (
                AppError::from(AdminError::Queue(QueueError::InvalidTransition("x".into()))),
                StatusCode::BAD_REQUEST,
            ),
            (AppError::from(QueueError::DeadLettered(id)), StatusCode::CONFLICT),
            (AppError::from(QueueError::Store("down".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::bad_request("bad queue"), StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status(), expected);
        }
    }
}
