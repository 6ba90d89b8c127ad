//! 身份数据库
//!
//! 两张表：`identity` 保存猫咪名字，`reference_vector` 保存每只猫的参考特征向量，
//! 删除身份时级联删除其向量。表结构见 `migrations/`。

use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Result, SqlitePool};

pub mod crud;
pub mod model;

pub use model::*;

pub type Database = SqlitePool;

/// 打开身份数据库并应用迁移
///
/// 识别线程读取的同时 CLI 可能在写入，因此使用 WAL 并设置忙等待时间
pub async fn init_db(path: impl AsRef<Path>) -> Result<Database> {
    let path = path.as_ref();
    info!("打开身份数据库: {}", path.display());

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;

    sqlx::migrate!().run(&pool).await?;
    debug!("身份数据库迁移完成");

    Ok(pool)
}
