use std::io::{self, BufReader};
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use log::{error, info, warn};
use prometheus::{BasicAuthentication, labels};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::spawn_blocking;
use tokio::time::{interval, sleep};

use crate::cli::{SubCommandExtend, auto_resolver, open_db};
use crate::config::{ExtractorOptions, MatchOptions};
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::server::{self, AppState, Mode};
use crate::utils::suffix_regex;
use crate::worker::{JobResolver, ManualResolver, WorkerOptions};
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:2255")]
    pub addr: String,
    /// 等待识别结果的超时时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub timeout: u64,
    /// 允许上传的图片后缀名，用逗号分隔
    #[arg(long, default_value = "png,jpg,jpeg,gif,webp")]
    pub suffix: String,
    /// 人工识别模式，由操作员在终端中输入猫咪名字
    #[arg(long)]
    pub manual: bool,
    /// 孤儿结果的保留时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 120, value_parser = clap::value_parser!(u64).range(2..))]
    pub result_grace: u64,
    /// 即使调用方已经超时，也继续处理尚未开始的任务
    #[arg(long)]
    pub process_abandoned: bool,
    /// 单个请求的最大上传大小，单位为 MB
    #[arg(long, value_name = "MB", default_value_t = 16)]
    pub max_upload: usize,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl ServerCommand {
    fn mode(&self) -> Mode {
        if self.manual { Mode::Manual } else { Mode::Auto }
    }

    fn pipeline_options(&self, opts: &Opts) -> anyhow::Result<PipelineOptions> {
        Ok(PipelineOptions {
            timeout: Duration::from_secs(self.timeout),
            temp_dir: opts.conf_dir.temp_dir(),
            suffix: suffix_regex(&self.suffix)?,
            worker: WorkerOptions { skip_abandoned: !self.process_abandoned },
        })
    }

    fn prometheus_auth(&self) -> anyhow::Result<Option<(String, String)>> {
        self.prometheus_auth
            .as_deref()
            .map(|s| {
                let (username, password) =
                    s.split_once(':').ok_or_else(|| anyhow!("prometheus 认证信息格式应为 username:password"))?;
                Ok((username.to_string(), password.to_string()))
            })
            .transpose()
    }

    fn spawn_prometheus_push(&self, url: String) -> anyhow::Result<()> {
        let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
        let auth = self.prometheus_auth()?;
        tokio::spawn(async move {
            loop {
                let metric_families = prometheus::gather();
                let url = url.clone();
                let instance = instance.clone();
                let auth = auth.clone();
                let r = spawn_blocking(move || {
                    prometheus::push_metrics(
                        "catid",
                        labels! {
                            "instance".to_string() => instance,
                        },
                        &url,
                        metric_families,
                        auth.map(|(username, password)| BasicAuthentication { username, password }),
                    )
                })
                .await;
                match r {
                    Ok(Err(e)) => error!("推送指标失败: {e}"),
                    Err(e) => error!("推送指标任务异常: {e}"),
                    Ok(Ok(())) => {}
                }
                sleep(Duration::from_secs(30)).await;
            }
        });
        Ok(())
    }
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let resolver: Box<dyn JobResolver> = match self.mode() {
            Mode::Manual => {
                info!("使用人工识别模式");
                Box::new(ManualResolver::new(BufReader::new(io::stdin()), io::stderr()))
            }
            Mode::Auto => {
                let db = open_db(&opts.conf_dir).await?;
                Box::new(auto_resolver(&self.extractor, &self.matching, db)?)
            }
        };

        let (pipeline, worker) =
            Pipeline::start(resolver, self.pipeline_options(opts)?).context("无法启动识别线程")?;

        // 创建应用状态
        let state = AppState::new(pipeline, self.matching.threshold, self.mode());

        // 创建应用
        let app = server::create_app(state.clone(), self.max_upload * 1024 * 1024);

        // 定期清理无人领取的结果
        let results = state.pipeline.results().clone();
        let grace = Duration::from_secs(self.result_grace);
        tokio::spawn(async move {
            let mut ticker = interval(grace / 2);
            loop {
                ticker.tick().await;
                let evicted = results.evict_expired(grace);
                if evicted > 0 {
                    warn!("清理了 {evicted} 个无人领取的识别结果");
                }
            }
        });

        if let Some(url) = self.prometheus_push.clone() {
            self.spawn_prometheus_push(url)?;
        }

        // 识别线程退出时也关闭服务器
        let (done_tx, done_rx) = oneshot::channel();
        let worker = spawn_blocking(move || {
            let r = worker.join();
            let _ = done_tx.send(());
            r
        });

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        info!("识别阈值: {}，超时时间: {}s", self.matching.threshold, self.timeout);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("服务器正在关闭..."),
                    _ = done_rx => warn!("识别线程已退出，服务器正在关闭..."),
                }
            })
            .await?;

        state.pipeline.shutdown();
        match worker.await {
            Ok(Ok(())) => info!("识别线程已停止"),
            Ok(Err(panic)) => error!("识别线程异常退出: {}", crate::extractor::panic_message(&*panic)),
            Err(e) => error!("等待识别线程失败: {e}"),
        }
        Ok(())
    }
}
