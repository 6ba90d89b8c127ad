use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum_typed_multipart::TypedMultipart;
use futures::future::join_all;
use log::info;

use super::error::{ApiError, Result};
use super::state::{AppState, Mode};
use super::types::*;
use crate::batch::{BatchEntry, summarize};
use crate::job::{ErrorKind, RecognitionResult};
use crate::metrics;
use crate::pipeline::InputError;

/// 识别一张图片
#[utoipa::path(
    post,
    path = "/recognize",
    request_body(content = RecognizeForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = RecognizeResponse),
        (status = 400, description = "图片缺失或格式不支持"),
        (status = 404, description = "未检测到猫脸，或人工模式下未识别"),
        (status = 408, description = "等待识别结果超时"),
        (status = 500, description = "识别出错"),
    )
)]
pub async fn recognize_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<RecognizeRequest>,
) -> Result<Json<RecognizeResponse>> {
    let image = data.image.ok_or(InputError::Missing)?;
    let start = Instant::now();
    let result = state.pipeline.submit(image.metadata.file_name.as_deref(), &image.contents).await?;
    info!("返回识别结果: {}，耗时 {}ms", result.label(), start.elapsed().as_millis());
    respond(state.mode, &result)
}

/// 根据识别结果和模式选择状态码
fn respond(mode: Mode, result: &RecognitionResult) -> Result<Json<RecognizeResponse>> {
    let data = RecognitionData::from(result);
    match result {
        RecognitionResult::Matched { .. } => Ok(Json(RecognizeResponse { success: true, data })),
        RecognitionResult::Unmatched { .. } => match mode {
            Mode::Auto => Ok(Json(RecognizeResponse { success: true, data })),
            Mode::Manual => Err(ApiError::NotFound(data)),
        },
        RecognitionResult::Error { kind: ErrorKind::DetectionFailure, .. } => Err(ApiError::NotFound(data)),
        RecognitionResult::Error { message, .. } => Err(ApiError::Internal(message.clone())),
    }
}

/// 批量识别图片，并推荐出现次数最多的名字
#[utoipa::path(
    post,
    path = "/recognize_batch",
    request_body(content = BatchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = BatchResponse),
        (status = 400, description = "没有上传图片"),
    )
)]
pub async fn recognize_batch_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<BatchRequest>,
) -> Result<Json<BatchResponse>> {
    if data.files.is_empty() {
        return Err(ApiError::BadRequest("No files provided".to_string()));
    }
    info!("收到批量识别请求，共 {} 张图片", data.files.len());

    // 所有图片同时排队，识别线程依次处理
    let entries = join_all(data.files.iter().map(|file| {
        let pipeline = &state.pipeline;
        async move {
            let filename = file.metadata.file_name.clone().unwrap_or_default();
            let outcome = pipeline
                .submit(file.metadata.file_name.as_deref(), &file.contents)
                .await
                .map_err(|e| e.to_string());
            BatchEntry { filename, outcome }
        }
    }))
    .await;

    let summary = summarize(entries);
    Ok(Json(BatchResponse::from(&summary)))
}

/// 查看队列状态
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, body = StatusResponse),
    )
)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let results = state.pipeline.results();
    Json(StatusResponse {
        queue_size: state.pipeline.queue_depth(),
        threshold: state.threshold,
        pending_results: results.ready_count() + results.waiting_count(),
        mode: state.mode.as_str().to_string(),
    })
}

/// 健康检查
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "catid recognition server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.mode.as_str().to_string(),
    })
}

/// 导出 prometheus 指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], metrics::gather_text())
}
