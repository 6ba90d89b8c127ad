use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::Serialize;
use utoipa::ToSchema;

use crate::batch::{BatchSummary, FailedImage, RecognizedImage};
use crate::job::{ErrorKind, RecognitionResult};

/// 单张识别请求
#[derive(TryFromMultipart)]
pub struct RecognizeRequest {
    #[form_data(limit = "unlimited")]
    pub image: Option<FieldData<Bytes>>,
}

/// 单张识别表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct RecognizeForm {
    /// 上传的猫咪图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub image: String,
}

/// 批量识别请求
#[derive(TryFromMultipart)]
pub struct BatchRequest {
    #[form_data(limit = "unlimited")]
    pub files: Vec<FieldData<Bytes>>,
}

/// 批量识别表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct BatchForm {
    /// 上传的图片文件，可以是多张图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub files: Vec<String>,
}

/// 识别结果
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionData {
    /// matched / unmatched / error
    pub status: String,
    /// 匹配到的名字，未匹配时为占位名字
    pub matched_name: Option<String>,
    pub score: Option<f32>,
    /// 置信度等级
    pub tier: Option<String>,
    pub message: String,
    #[schema(value_type = Option<String>)]
    pub error_kind: Option<ErrorKind>,
}

impl From<&RecognitionResult> for RecognitionData {
    fn from(result: &RecognitionResult) -> Self {
        Self {
            status: result.status().as_str().to_string(),
            matched_name: match result.error_kind() {
                Some(_) => None,
                None => Some(result.label().to_string()),
            },
            score: result.score(),
            tier: result.tier().map(|tier| tier.as_str().to_string()),
            message: result.message().to_string(),
            error_kind: result.error_kind(),
        }
    }
}

/// 单张识别响应
#[derive(Debug, Serialize, ToSchema)]
pub struct RecognizeResponse {
    pub success: bool,
    pub data: RecognitionData,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecognizedFile {
    pub filename: String,
    #[serde(flatten)]
    pub data: RecognitionData,
}

impl From<&RecognizedImage> for RecognizedFile {
    fn from(image: &RecognizedImage) -> Self {
        Self { filename: image.filename.clone(), data: RecognitionData::from(&image.result) }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FailedFile {
    pub filename: String,
    pub error: String,
    #[schema(value_type = Option<String>)]
    pub error_kind: Option<ErrorKind>,
}

impl From<&FailedImage> for FailedFile {
    fn from(image: &FailedImage) -> Self {
        Self { filename: image.filename.clone(), error: image.error.clone(), error_kind: image.error_kind }
    }
}

/// 批量识别响应
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchResponse {
    pub success: bool,
    pub message: String,
    pub recognized_count: usize,
    pub failed_count: usize,
    /// 匹配次数最多的名字
    pub suggested_name: Option<String>,
    pub recognition_results: Vec<RecognizedFile>,
    pub failed_files: Vec<FailedFile>,
}

impl From<&BatchSummary> for BatchResponse {
    fn from(summary: &BatchSummary) -> Self {
        let message = match &summary.suggested_name {
            Some(name) => format!(
                "成功识别 {} 张图片，{} 张失败，推荐名字: {name}",
                summary.recognized_count(),
                summary.failed_count()
            ),
            None => format!(
                "成功识别 {} 张图片，{} 张失败，没有匹配到已知猫咪",
                summary.recognized_count(),
                summary.failed_count()
            ),
        };
        Self {
            success: true,
            message,
            recognized_count: summary.recognized_count(),
            failed_count: summary.failed_count(),
            suggested_name: summary.suggested_name.clone(),
            recognition_results: summary.recognized.iter().map(RecognizedFile::from).collect(),
            failed_files: summary.failed.iter().map(FailedFile::from).collect(),
        }
    }
}

/// 健康检查响应
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// auto / manual
    pub mode: String,
}

/// 服务状态响应
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// 队列中等待处理的任务数量
    pub queue_size: usize,
    pub threshold: f32,
    /// 尚未完成或未被取走的结果数量
    pub pending_results: usize,
    pub mode: String,
}
