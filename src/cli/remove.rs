use anyhow::{Result, bail};
use clap::Parser;
use log::info;

use crate::cli::{SubCommandExtend, open_db};
use crate::config::Opts;
use crate::db::crud;

#[derive(Parser, Debug, Clone)]
pub struct RemoveCommand {
    /// 要删除的身份 ID，可以通过 list 命令查看
    pub id: i64,
}

impl SubCommandExtend for RemoveCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = open_db(&opts.conf_dir).await?;
        if !crud::remove_identity(&db, self.id).await? {
            bail!("身份 {} 不存在", self.id);
        }
        info!("已删除身份 {}", self.id);
        Ok(())
    }
}
