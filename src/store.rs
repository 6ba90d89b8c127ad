use thiserror::Error;
use tokio::runtime::Handle;

use crate::db::{self, Database, VectorRow};
use crate::job::FeatureVector;
use crate::utils::bytes_to_vector;

/// 一只已知的猫，名字不保证唯一
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    /// 参考向量，按添加顺序排列
    pub vectors: Vec<FeatureVector>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("数据库为空")]
    Empty,
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据损坏: {0}")]
    Corrupted(String),
}

/// 身份库，每次调用都返回完整的身份列表
pub trait IdentityStore: Send + Sync {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;
}

/// 内存中的身份库
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    identities: Vec<Identity>,
}

impl MemoryIdentityStore {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        if self.identities.is_empty() {
            return Err(StoreError::Empty);
        }
        Ok(self.identities.clone())
    }
}

/// 基于 sqlite 的身份库
///
/// 识别线程不在 tokio 运行时中，因此通过 [`Handle::block_on`] 执行查询。
/// 注意：不能在运行时的工作线程里调用 `list_identities`。
pub struct SqliteIdentityStore {
    db: Database,
    handle: Handle,
}

impl SqliteIdentityStore {
    pub fn new(db: Database, handle: Handle) -> Self {
        Self { db, handle }
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let rows = self.handle.block_on(db::crud::list_vector_rows(&self.db))?;
        let identities = group_identities(rows)?;
        if identities.is_empty() {
            return Err(StoreError::Empty);
        }
        Ok(identities)
    }
}

/// 将按 (identity_id, vector_id) 排序的行合并为身份列表
pub fn group_identities(rows: Vec<VectorRow>) -> Result<Vec<Identity>, StoreError> {
    let mut identities: Vec<Identity> = vec![];
    let mut last_id = None;
    for row in rows {
        if last_id != Some(row.identity_id) {
            last_id = Some(row.identity_id);
            identities.push(Identity { name: row.name, vectors: vec![] });
        }
        let Some(blob) = row.vector else {
            continue;
        };
        let vector = bytes_to_vector(&blob).ok_or_else(|| {
            StoreError::Corrupted(format!("身份 {} 的参考向量长度为 {} 字节", row.identity_id, blob.len()))
        })?;
        if let Some(identity) = identities.last_mut() {
            identity.vectors.push(vector);
        }
    }
    Ok(identities)
}
