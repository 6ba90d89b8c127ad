use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::decision::DEFAULT_THRESHOLD;

static CONF_DIR: LazyLock<String> = LazyLock::new(|| match ProjectDirs::from("", "catid", "catid") {
    Some(dirs) => dirs.config_dir().to_string_lossy().into_owned(),
    None => ".catid".to_string(),
});

fn default_config_dir() -> &'static str {
    CONF_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct MatchOptions {
    /// 相似度阈值，不低于该值才确认为已知猫咪
    #[arg(short, long, value_name = "SIM", default_value_t = DEFAULT_THRESHOLD, value_parser = parse_threshold)]
    pub threshold: f32,
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// 特征提取程序，会以图片路径作为最后一个参数调用
    /// 程序需要输出 {"vector": [...]}，未检测到猫时输出 {"vector": null}
    #[arg(long, value_name = "PROGRAM", verbatim_doc_comment)]
    pub extractor: Option<String>,
    /// 传给特征提取程序的额外参数，可以重复指定
    #[arg(long = "extractor-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub extractor_args: Vec<String>,
    /// 单张图片特征提取的超时时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 20)]
    pub extractor_timeout: u64,
}

impl ExtractorOptions {
    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "catid", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// catid 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 启动 HTTP 识别服务
    Server(ServerCommand),
    /// 添加一只猫及其参考特征向量
    Add(AddCommand),
    /// 列出数据库中的猫
    List(ListCommand),
    /// 从数据库中删除一只猫
    Remove(RemoveCommand),
    /// 识别单张图片
    Recognize(RecognizeCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("catid.db")
    }

    /// 返回识别临时文件目录
    pub fn temp_dir(&self) -> PathBuf {
        self.path.join("temp_recognition")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_threshold(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("无效的阈值 {s}: {e}"))?;
    if !(-1.0..=1.0).contains(&value) {
        return Err(format!("阈值必须在 -1 到 1 之间: {s}"));
    }
    Ok(value)
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
