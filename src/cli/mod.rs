mod add;
mod list;
mod recognize;
mod remove;
pub mod server;

pub use add::*;
pub use list::*;
pub use recognize::*;
pub use remove::*;
pub use server::*;

use anyhow::{Context, anyhow};
use tokio::runtime::Handle;

use crate::config::{ConfDir, ExtractorOptions, MatchOptions, Opts};
use crate::db::{Database, init_db};
use crate::decision::DecisionEngine;
use crate::extractor::{CommandExtractor, ExtractorHost};
use crate::store::SqliteIdentityStore;
use crate::worker::AutoResolver;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 打开配置目录下的数据库，目录不存在时自动创建
pub async fn open_db(conf_dir: &ConfDir) -> anyhow::Result<Database> {
    std::fs::create_dir_all(conf_dir.path())
        .with_context(|| format!("无法创建配置目录 {}", conf_dir.path().display()))?;
    Ok(init_db(conf_dir.database()).await?)
}

/// 构建自动识别后端
///
/// 必须在 tokio 运行时中调用，身份库会借用当前运行时执行查询
pub fn auto_resolver(
    extractor: &ExtractorOptions,
    matching: &MatchOptions,
    db: Database,
) -> anyhow::Result<AutoResolver> {
    let program = extractor
        .extractor
        .clone()
        .ok_or_else(|| anyhow!("自动识别需要通过 --extractor 指定特征提取程序"))?;
    let command = CommandExtractor::new(program, extractor.extractor_args.clone());
    let host = ExtractorHost::spawn(Box::new(command), extractor.extractor_timeout())?;
    let store = SqliteIdentityStore::new(db, Handle::current());
    Ok(AutoResolver::new(host, Box::new(store), DecisionEngine::new(matching.threshold)))
}
