use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde_json::json;

use super::types::RecognitionData;
use crate::pipeline::{InputError, SubmitError};

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// 未预料到的错误，统一返回 500
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("请求处理失败: {:#}", self.0);
        ApiError::Internal("server_error".to_string()).into_response()
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

/// API错误类型，响应体为 `{"success": false, "error": ...}`
pub enum ApiError {
    /// 400，请求内容不合法
    BadRequest(String),
    /// 404，没有识别出猫咪
    NotFound(RecognitionData),
    /// 408，等待识别结果超时
    Timeout,
    /// 500
    Internal(String),
    App(AppError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(error) => (StatusCode::BAD_REQUEST, json!({ "success": false, "error": error })),
            Self::NotFound(data) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "error": data.message, "data": data }),
            ),
            Self::Timeout => (StatusCode::REQUEST_TIMEOUT, json!({ "success": false, "error": "timeout" })),
            Self::Internal(error) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "success": false, "error": error }))
            }
            Self::App(e) => return e.into_response(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<InputError> for ApiError {
    fn from(err: InputError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Input(e) => e.into(),
            SubmitError::Timeout => Self::Timeout,
            SubmitError::Closed => Self::Internal(err.to_string()),
            SubmitError::Io(e) => Self::App(AppError(e.into())),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}
