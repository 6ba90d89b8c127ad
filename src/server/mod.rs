mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::recognize_handler,
        api::recognize_batch_handler,
        api::status_handler,
        api::health_handler,
        api::metrics_handler,
    ),
    components(schemas(
        types::RecognizeForm,
        types::BatchForm,
        types::RecognizeResponse,
        types::BatchResponse,
        types::StatusResponse,
        types::HealthResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
///
/// `max_upload` 为请求体的最大字节数
pub fn create_app(state: Arc<AppState>, max_upload: usize) -> Router {
    Router::new()
        .route("/recognize", post(api::recognize_handler))
        .route("/recognize_batch", post(api::recognize_batch_handler))
        .route("/status", get(api::status_handler))
        .route("/health", get(api::health_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload))
        .with_state(state)
}
