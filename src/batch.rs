use serde::Serialize;

use crate::job::{ErrorKind, RecognitionResult, Status};

/// 批量识别中单张图片的结果
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub filename: String,
    pub outcome: Result<RecognitionResult, String>,
}

/// 识别失败的图片
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedImage {
    pub filename: String,
    pub error: String,
    /// 任务层面的错误类型，提交阶段就失败的图片没有
    pub error_kind: Option<ErrorKind>,
}

/// 识别成功（包括未匹配）的图片
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedImage {
    pub filename: String,
    pub result: RecognitionResult,
}

/// 批量识别汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub recognized: Vec<RecognizedImage>,
    pub failed: Vec<FailedImage>,
    /// 匹配次数最多的名字
    pub suggested_name: Option<String>,
}

impl BatchSummary {
    pub fn recognized_count(&self) -> usize {
        self.recognized.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// 汇总批量识别结果
///
/// 只有状态为 Matched 的图片参与投票，票数相同时取最先出现的名字。
pub fn summarize(entries: impl IntoIterator<Item = BatchEntry>) -> BatchSummary {
    let mut recognized = vec![];
    let mut failed = vec![];
    // 保持首次出现的顺序
    let mut votes: Vec<(String, usize)> = vec![];

    for BatchEntry { filename, outcome } in entries {
        match outcome {
            Ok(result) if result.status() != Status::Error => {
                if let Some(name) = result.matched_name() {
                    match votes.iter_mut().find(|(n, _)| n == name) {
                        Some((_, count)) => *count += 1,
                        None => votes.push((name.to_string(), 1)),
                    }
                }
                recognized.push(RecognizedImage { filename, result });
            }
            Ok(result) => failed.push(FailedImage {
                filename,
                error: result.message().to_string(),
                error_kind: result.error_kind(),
            }),
            Err(error) => failed.push(FailedImage { filename, error, error_kind: None }),
        }
    }

    let mut suggested: Option<(String, usize)> = None;
    for (name, count) in votes {
        if suggested.as_ref().is_none_or(|(_, best)| count > *best) {
            suggested = Some((name, count));
        }
    }

    BatchSummary { recognized, failed, suggested_name: suggested.map(|(name, _)| name) }
}
