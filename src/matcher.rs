use thiserror::Error;

use crate::store::Identity;

#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    #[error("身份库为空")]
    EmptyStore,
    #[error("身份库中没有任何参考向量")]
    NoReferenceVectors,
    #[error("向量维度不一致: 查询向量 {query}，{name} 的参考向量 {reference}")]
    DimensionMismatch { name: String, query: usize, reference: usize },
}

/// 最佳匹配
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub name: String,
    pub score: f32,
}

/// 计算两个向量的余弦相似度
///
/// 任意一个向量为零向量时返回 0，结果不做截断。
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// 在所有身份中寻找与查询向量最相似的一个
///
/// 每个身份的得分取其所有参考向量中的最大相似度，
/// 得分相同时取遍历顺序中第一个达到最大值的身份。
/// 没有参考向量的身份会被跳过。
pub fn find_best_match(query: &[f32], identities: &[Identity]) -> Result<BestMatch, MatchError> {
    if identities.is_empty() {
        return Err(MatchError::EmptyStore);
    }

    let mut best: Option<(&str, f32)> = None;
    for identity in identities {
        let mut identity_score: Option<f32> = None;
        for vector in &identity.vectors {
            if vector.len() != query.len() {
                return Err(MatchError::DimensionMismatch {
                    name: identity.name.clone(),
                    query: query.len(),
                    reference: vector.len(),
                });
            }
            let sim = cosine_similarity(query, vector);
            if identity_score.is_none_or(|s| sim > s) {
                identity_score = Some(sim);
            }
        }
        let Some(score) = identity_score else {
            continue;
        };
        // 严格大于，保证平分时先出现的身份胜出
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((&identity.name, score));
        }
    }

    best.map(|(name, score)| BestMatch { name: name.to_owned(), score })
        .ok_or(MatchError::NoReferenceVectors)
}
