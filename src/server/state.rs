use std::sync::Arc;

use crate::pipeline::Pipeline;

/// 识别模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 特征提取器自动识别
    Auto,
    /// 操作员人工识别
    Manual,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// 应用状态
pub struct AppState {
    /// 识别流水线
    pub pipeline: Pipeline,
    /// 相似度阈值，仅用于展示
    pub threshold: f32,
    pub mode: Mode,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(pipeline: Pipeline, threshold: f32, mode: Mode) -> Arc<Self> {
        Arc::new(AppState { pipeline, threshold, mode })
    }
}
