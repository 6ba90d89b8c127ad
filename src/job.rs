use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::decision::ConfidenceTier;

/// 任务 ID，对调用方不透明
pub type JobId = Uuid;

/// 特征向量，维度由外部特征提取器决定
pub type FeatureVector = Vec<f32>;

/// 未匹配时展示的占位名字
pub const UNKNOWN_LABEL: &str = "待定 (Unknown)";

/// 识别任务使用的临时图片，drop 时自动删除
#[derive(Debug)]
pub struct TempImage {
    file: NamedTempFile,
}

impl TempImage {
    /// 将上传的图片内容写入 `dir` 下的临时文件
    ///
    /// # Arguments
    ///
    /// * `dir` - 临时目录
    /// * `ext` - 文件后缀名，不带 `.`
    /// * `data` - 图片内容
    pub fn create(dir: &Path, ext: &str, data: &[u8]) -> io::Result<Self> {
        let suffix = format!(".{}", ext.to_ascii_lowercase());
        let mut file = tempfile::Builder::new().prefix("job-").suffix(&suffix).tempfile_in(dir)?;
        file.write_all(data)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// 删除临时文件，并返回删除时的错误
    pub fn close(self) -> io::Result<()> {
        self.file.close()
    }
}

/// 一次识别任务
#[derive(Debug)]
pub struct RecognitionJob {
    pub id: JobId,
    pub image: TempImage,
    /// 上传时的原始文件名
    pub filename: String,
    pub submitted_at: Instant,
}

impl RecognitionJob {
    pub fn new(image: TempImage, filename: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), image, filename: filename.into(), submitted_at: Instant::now() }
    }
}

/// 识别状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Matched,
    Unmatched,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Unmatched => "unmatched",
            Self::Error => "error",
        }
    }
}

/// 任务失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 图片中没有检测到猫
    DetectionFailure,
    /// 特征提取器出错或超时
    ExtractionFailure,
    /// 身份库无法读取或为空
    StorageError,
    /// 处理过程中出现了预料之外的错误
    WorkerFault,
    /// 调用方在任务开始前就已放弃等待
    Abandoned,
    /// 识别线程已停止，任务没有被处理
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DetectionFailure => "detection_failure",
            Self::ExtractionFailure => "extraction_failure",
            Self::StorageError => "storage_error",
            Self::WorkerFault => "worker_fault",
            Self::Abandoned => "abandoned",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 识别结果
///
/// 匹配成功时才有名字，出错时没有相似度，只有出错时才有错误类型。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecognitionResult {
    Matched { name: String, score: f32, tier: ConfidenceTier, message: String },
    Unmatched { nearest: Option<String>, score: f32, message: String },
    Error { kind: ErrorKind, message: String },
}

impl RecognitionResult {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error { kind, message: message.into() }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Matched { .. } => Status::Matched,
            Self::Unmatched { .. } => Status::Unmatched,
            Self::Error { .. } => Status::Error,
        }
    }

    pub fn matched_name(&self) -> Option<&str> {
        match self {
            Self::Matched { name, .. } => Some(name),
            _ => None,
        }
    }

    /// 用于展示的名字，未匹配时为 [`UNKNOWN_LABEL`]
    pub fn label(&self) -> &str {
        self.matched_name().unwrap_or(UNKNOWN_LABEL)
    }

    pub fn score(&self) -> Option<f32> {
        match self {
            Self::Matched { score, .. } | Self::Unmatched { score, .. } => Some(*score),
            Self::Error { .. } => None,
        }
    }

    pub fn tier(&self) -> Option<ConfidenceTier> {
        match self {
            Self::Matched { tier, .. } => Some(*tier),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Matched { message, .. }
            | Self::Unmatched { message, .. }
            | Self::Error { message, .. } => message,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// 指标使用的状态标签，出错时为具体的错误类型
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Error { kind, .. } => kind.as_str(),
            _ => self.status().as_str(),
        }
    }
}
