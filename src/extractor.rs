use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::job::FeatureVector;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("特征提取超时（{0:?}）")]
    Timeout(Duration),
    #[error("特征提取器不可用")]
    Unavailable,
    #[error("特征提取器崩溃: {0}")]
    Crashed(String),
    #[error("无法运行特征提取程序: {0}")]
    Io(#[from] std::io::Error),
    #[error("特征提取程序异常退出（{status}）: {stderr}")]
    Command { status: String, stderr: String },
    #[error("无法解析特征提取程序的输出: {0}")]
    Output(#[from] serde_json::Error),
    #[error("特征向量为空")]
    EmptyVector,
}

/// 特征提取器
///
/// 成功时返回 `Some(vector)`，图片中没有检测到猫时返回 `None`。
/// 实现不需要是线程安全的，同一时间只会有一个调用。
pub trait FeatureExtractor: Send {
    fn extract(&mut self, image: &Path) -> Result<Option<FeatureVector>, ExtractError>;
}

/// 外部程序输出的格式
#[derive(Debug, Deserialize)]
struct CommandOutput {
    vector: Option<FeatureVector>,
}

/// 调用外部程序提取特征
///
/// 运行 `program args... <image>`，程序需要在标准输出打印
/// `{"vector": [...]}`，未检测到猫时打印 `{"vector": null}`。
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl FeatureExtractor for CommandExtractor {
    fn extract(&mut self, image: &Path) -> Result<Option<FeatureVector>, ExtractError> {
        let output = Command::new(&self.program).args(&self.args).arg(image).output()?;
        if !output.status.success() {
            return Err(ExtractError::Command {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let parsed: CommandOutput = serde_json::from_slice(&output.stdout)?;
        match parsed.vector {
            Some(vector) if vector.is_empty() => Err(ExtractError::EmptyVector),
            vector => Ok(vector),
        }
    }
}

struct Request {
    seq: u64,
    path: PathBuf,
}

struct Response {
    seq: u64,
    result: Result<Option<FeatureVector>, ExtractError>,
}

/// 在独立线程中运行特征提取器，以便调用方施加超时
///
/// 提取器只在这一个线程里被调用，超时的请求仍会在后台执行完，
/// 其结果按序号丢弃，后续请求在它之后排队执行。
pub struct ExtractorHost {
    tx: Sender<Request>,
    rx: Receiver<Response>,
    timeout: Duration,
    seq: u64,
}

impl ExtractorHost {
    pub fn spawn(mut extractor: Box<dyn FeatureExtractor>, timeout: Duration) -> std::io::Result<Self> {
        let (tx, req_rx) = unbounded::<Request>();
        let (res_tx, rx) = unbounded::<Response>();
        thread::Builder::new().name("extractor".to_string()).spawn(move || {
            for req in req_rx {
                let result = catch_unwind(AssertUnwindSafe(|| extractor.extract(&req.path)))
                    .unwrap_or_else(|panic| Err(ExtractError::Crashed(panic_message(&*panic))));
                if res_tx.send(Response { seq: req.seq, result }).is_err() {
                    break;
                }
            }
            debug!("特征提取线程退出");
        })?;
        Ok(Self { tx, rx, timeout, seq: 0 })
    }

    pub fn extract(&mut self, image: &Path) -> Result<Option<FeatureVector>, ExtractError> {
        self.seq += 1;
        let seq = self.seq;
        self.tx
            .send(Request { seq, path: image.to_path_buf() })
            .map_err(|_| ExtractError::Unavailable)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(resp) if resp.seq == seq => return resp.result,
                Ok(resp) => debug!("丢弃已超时的提取结果 #{}", resp.seq),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("特征提取超过 {:?}，放弃等待 #{seq}", self.timeout);
                    return Err(ExtractError::Timeout(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(ExtractError::Unavailable),
            }
        }
    }
}

/// 从 panic 负载中取出错误信息
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
