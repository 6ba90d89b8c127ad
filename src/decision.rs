use std::fmt;

use serde::Serialize;

use crate::job::RecognitionResult;
use crate::matcher::BestMatch;

/// 默认相似度阈值，不低于该值才确认为已知猫咪
pub const DEFAULT_THRESHOLD: f32 = 0.80;

const VERY_HIGH_FLOOR: f32 = 0.85;
const HIGH_FLOOR: f32 = 0.75;

/// 置信度等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfidenceTier {
    #[serde(rename = "very high")]
    VeryHigh,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "credible")]
    Credible,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryHigh => "very high",
            Self::High => "high",
            Self::Credible => "credible",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 根据最佳匹配和阈值给出最终结果
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine {
    threshold: f32,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl DecisionEngine {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 计算已匹配分数的置信度等级
    ///
    /// "high" 的下界取 0.75 与阈值中较大者（不含），
    /// 因此恰好等于阈值的分数总是落在 "credible"。
    pub fn tier(&self, score: f32) -> ConfidenceTier {
        if score > VERY_HIGH_FLOOR {
            ConfidenceTier::VeryHigh
        } else if score > HIGH_FLOOR.max(self.threshold) {
            ConfidenceTier::High
        } else {
            ConfidenceTier::Credible
        }
    }

    pub fn decide(&self, best: BestMatch) -> RecognitionResult {
        let BestMatch { name, score } = best;
        if score >= self.threshold {
            let tier = self.tier(score);
            let message = format!("识别成功！这很可能是 {name}。(置信度: {tier})");
            RecognitionResult::Matched { name, score, tier, message }
        } else {
            let message = format!(
                "未在数据库中找到足够相似的猫。最接近的是 {name} (相似度 {score:.2})，但未达到阈值 {}。",
                self.threshold
            );
            RecognitionResult::Unmatched { nearest: Some(name), score, message }
        }
    }
}
