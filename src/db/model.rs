use serde::Serialize;
use sqlx::FromRow;

/// 参考向量与所属身份的联合记录
#[derive(Debug, FromRow)]
pub struct VectorRow {
    /// 身份 ID
    pub identity_id: i64,
    /// 身份名字
    pub name: String,
    /// 小端序 f32 向量，没有参考向量的身份为 NULL
    pub vector: Option<Vec<u8>>,
}

/// 身份概要
#[derive(Debug, FromRow, Serialize)]
pub struct IdentitySummary {
    pub id: i64,
    pub name: String,
    /// 参考向量数量
    pub vector_count: i64,
    /// 创建时间，UNIX 时间戳
    pub created_at: i64,
}
