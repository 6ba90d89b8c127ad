use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio::task::spawn_blocking;

use crate::cli::{SubCommandExtend, auto_resolver, open_db};
use crate::config::{ExtractorOptions, MatchOptions, Opts, OutputFormat};
use crate::job::{RecognitionJob, TempImage};
use crate::utils::extension;
use crate::worker::JobResolver;

#[derive(Parser, Debug, Clone)]
pub struct RecognizeCommand {
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    /// 要识别的图片
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for RecognizeCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let data = std::fs::read(&self.image).with_context(|| format!("无法读取图片 {}", self.image.display()))?;
        let filename = self.image.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let ext = extension(&filename).unwrap_or("img").to_string();

        let db = open_db(&opts.conf_dir).await?;
        let mut resolver = auto_resolver(&self.extractor, &self.matching, db)?;

        let temp_dir = opts.conf_dir.temp_dir();
        std::fs::create_dir_all(&temp_dir)?;
        let job = RecognitionJob::new(TempImage::create(&temp_dir, &ext, &data)?, filename);

        // 身份库会在当前运行时上阻塞查询，必须放到阻塞线程中执行
        let result = spawn_blocking(move || {
            let result = resolver.resolve(&job);
            job.image.close().map(|_| result)
        })
        .await
        .map_err(|e| anyhow!("识别任务异常: {e}"))??;

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
            OutputFormat::Table => {
                let score = result.score().map(|s| format!("{s:.4}")).unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{}\t{}", result.status().as_str(), result.label(), score, result.message());
            }
        }
        Ok(())
    }
}
