use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};
use regex::Regex;
use thiserror::Error;

use crate::job::{RecognitionJob, RecognitionResult, TempImage};
use crate::metrics;
use crate::queue::{JobQueue, job_queue};
use crate::results::{ResultStore, WaitError};
use crate::utils::{extension, secure_filename};
use crate::worker::{JobResolver, Worker, WorkerOptions};

/// 上传内容不合法，不会进入队列
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("No image file provided")]
    Missing,
    #[error("Empty image file")]
    Empty,
    #[error("Invalid file format or no file selected")]
    InvalidType,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("timeout")]
    Timeout,
    #[error("识别服务已停止")]
    Closed,
    #[error("无法保存临时文件: {0}")]
    Io(#[from] std::io::Error),
}

/// 提交识别任务的配置
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// 等待识别结果的最长时间
    pub timeout: Duration,
    /// 临时图片目录
    pub temp_dir: PathBuf,
    /// 允许的后缀名
    pub suffix: Regex,
    pub worker: WorkerOptions,
}

/// 识别任务流水线：多个提交方，一个识别线程
pub struct Pipeline {
    queue: JobQueue,
    results: Arc<ResultStore>,
    options: PipelineOptions,
}

impl Pipeline {
    /// 创建流水线并启动识别线程
    pub fn start(
        resolver: Box<dyn JobResolver>,
        options: PipelineOptions,
    ) -> std::io::Result<(Self, JoinHandle<()>)> {
        std::fs::create_dir_all(&options.temp_dir)?;
        let (queue, jobs) = job_queue();
        let results = Arc::new(ResultStore::new());
        let worker = Worker::new(jobs, results.clone(), resolver, options.worker);
        let handle = worker.spawn()?;
        Ok((Self { queue, results, options }, handle))
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    /// 检查上传的图片，返回清理后的文件名和后缀名
    pub fn validate(&self, filename: Option<&str>, data: &[u8]) -> Result<(String, String), InputError> {
        let filename = match filename {
            Some(name) if !name.trim().is_empty() => secure_filename(name),
            _ => return Err(InputError::InvalidType),
        };
        let ext = match extension(&filename) {
            Some(ext) if self.options.suffix.is_match(ext) => ext.to_ascii_lowercase(),
            _ => return Err(InputError::InvalidType),
        };
        if data.is_empty() {
            return Err(InputError::Empty);
        }
        Ok((filename, ext))
    }

    /// 提交一张图片并等待识别结果
    ///
    /// 超时后任务不会被取消：如果识别线程还没开始处理，它会跳过该任务，
    /// 否则结果成为孤儿，等待被清理。
    pub async fn submit(&self, filename: Option<&str>, data: &[u8]) -> Result<RecognitionResult, SubmitError> {
        let (filename, ext) = self.validate(filename, data).inspect_err(|e| {
            metrics::inc_submission_count("invalid");
            warn!("拒绝识别请求: {e}");
        })?;

        let image = TempImage::create(&self.options.temp_dir, &ext, data)?;
        let job = RecognitionJob::new(image, filename);
        let id = job.id;
        info!("收到识别请求: {}，已保存至 {}", job.filename, job.image.path().display());

        // 必须在入队之前登记，否则可能错过结果
        let rx = self.results.subscribe(id);
        if self.queue.enqueue(job).is_err() {
            self.results.forget(&id);
            metrics::inc_submission_count("closed");
            return Err(SubmitError::Closed);
        }

        match self.results.wait(id, rx, self.options.timeout).await {
            Ok(result) => {
                metrics::inc_submission_count("ok");
                Ok(result)
            }
            Err(WaitError::Timeout) => {
                warn!("任务 {id} 识别超时");
                metrics::inc_submission_count("timeout");
                Err(SubmitError::Timeout)
            }
            Err(WaitError::Closed) => {
                metrics::inc_submission_count("closed");
                Err(SubmitError::Closed)
            }
        }
    }

    /// 请求识别线程在处理完已排队的任务后退出
    pub fn shutdown(&self) {
        self.queue.stop();
    }
}
