use sqlx::{Executor, Result, Sqlite, SqlitePool};

use super::{IdentitySummary, VectorRow};

/// 添加身份记录
pub async fn add_identity<'c, E>(executor: E, name: &str) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO identity (name)
        VALUES (?)
        RETURNING id
        "#,
    )
    .bind(name)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// 添加参考向量
pub async fn add_vector<'c, E>(executor: E, identity_id: i64, vector: &[u8]) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO reference_vector (identity_id, vector)
        VALUES (?, ?)
        "#,
    )
    .bind(identity_id)
    .bind(vector)
    .execute(executor)
    .await?;

    Ok(())
}

/// 在一个事务中添加身份及其全部参考向量
pub async fn add_identity_with_vectors(
    executor: &SqlitePool,
    name: &str,
    vectors: &[Vec<u8>],
) -> Result<i64> {
    let mut tx = executor.begin().await?;
    let id = add_identity(&mut *tx, name).await?;
    for vector in vectors {
        add_vector(&mut *tx, id, vector).await?;
    }
    tx.commit().await?;
    Ok(id)
}

/// 获取全部参考向量，按身份 ID 和向量 ID 排序
///
/// 没有参考向量的身份也会返回一行，`vector` 为 NULL
pub async fn list_vector_rows(executor: &SqlitePool) -> Result<Vec<VectorRow>> {
    sqlx::query_as(
        r#"
        SELECT identity.id AS identity_id, identity.name AS name, reference_vector.vector AS vector
        FROM identity
        LEFT JOIN reference_vector ON reference_vector.identity_id = identity.id
        ORDER BY identity.id ASC, reference_vector.id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 获取所有身份的概要信息
pub async fn list_summaries(executor: &SqlitePool) -> Result<Vec<IdentitySummary>> {
    sqlx::query_as(
        r#"
        SELECT identity.id AS id, identity.name AS name,
            COUNT(reference_vector.id) AS vector_count, identity.created_at AS created_at
        FROM identity
        LEFT JOIN reference_vector ON reference_vector.identity_id = identity.id
        GROUP BY identity.id
        ORDER BY identity.id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 删除身份，返回是否存在该身份
pub async fn remove_identity(executor: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = executor.begin().await?;
    sqlx::query("DELETE FROM reference_vector WHERE identity_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM identity WHERE id = ?").bind(id).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}
