use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, open_db};
use crate::config::{Opts, OutputFormat};
use crate::db::crud;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = open_db(&opts.conf_dir).await?;
        let summaries = crud::list_summaries(&db).await?;
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
            OutputFormat::Table => {
                for s in &summaries {
                    println!("{}\t{}\t{}", s.id, s.name, s.vector_count);
                }
            }
        }
        Ok(())
    }
}
