// API 错误响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt;
use tracing::error;

use super::handlers::ApiResponse;
use crate::error::UploadError;

/// 返回给客户端的错误
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::MalformedMultipartHeader(_)
            | UploadError::MissingBoundaryToken
            | UploadError::UnexpectedEof { .. }
            | UploadError::HeaderTooLarge { .. } => StatusCode::BAD_REQUEST,
            UploadError::BodyRead { too_large: true, .. }
            | UploadError::FieldTooLarge { .. }
            | UploadError::TooManyParts { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::BodyRead { .. } => StatusCode::BAD_REQUEST,
            UploadError::LinkNotFound => StatusCode::NOT_FOUND,
            UploadError::BackendCallFailed { .. } => StatusCode::BAD_GATEWAY,
            UploadError::ContractViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("请求失败: {}", self);
        }
        let body = Json(ApiResponse::<()>::error(
            self.status.as_u16() as i32,
            self.message,
        ));
        (self.status, body).into_response()
    }
}
