use std::io::{BufRead, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{error, info, warn};

use crate::decision::DecisionEngine;
use crate::extractor::{ExtractorHost, panic_message};
use crate::job::{ErrorKind, RecognitionJob, RecognitionResult, UNKNOWN_LABEL};
use crate::matcher::find_best_match;
use crate::metrics;
use crate::queue::JobReceiver;
use crate::results::ResultStore;
use crate::store::IdentityStore;

/// 将一个任务解析为识别结果
///
/// 识别线程对每个任务只调用一次 `resolve`，同一时间不会并发调用。
pub trait JobResolver: Send {
    fn resolve(&mut self, job: &RecognitionJob) -> RecognitionResult;

    /// 处理完当前任务后是否需要退出识别线程
    fn wants_shutdown(&self) -> bool {
        false
    }
}

/// 使用特征提取器和身份库自动识别
pub struct AutoResolver {
    extractor: ExtractorHost,
    store: Box<dyn IdentityStore>,
    decision: DecisionEngine,
}

impl AutoResolver {
    pub fn new(extractor: ExtractorHost, store: Box<dyn IdentityStore>, decision: DecisionEngine) -> Self {
        Self { extractor, store, decision }
    }
}

impl JobResolver for AutoResolver {
    fn resolve(&mut self, job: &RecognitionJob) -> RecognitionResult {
        let vector = match self.extractor.extract(job.image.path()) {
            Ok(Some(vector)) => vector,
            Ok(None) => {
                warn!("任务 {}: 未能在图片 {} 中检测到猫脸", job.id, job.filename);
                return RecognitionResult::error(ErrorKind::DetectionFailure, "未能在图片中检测到猫脸");
            }
            Err(e) => {
                error!("任务 {}: 特征提取失败: {e}", job.id);
                return RecognitionResult::error(ErrorKind::ExtractionFailure, e.to_string());
            }
        };

        // 每个任务都重新读取完整的身份库
        let identities = match self.store.list_identities() {
            Ok(identities) => identities,
            Err(e) => {
                error!("任务 {}: {e}", job.id);
                return RecognitionResult::error(ErrorKind::StorageError, e.to_string());
            }
        };

        match find_best_match(&vector, &identities) {
            Ok(best) => {
                metrics::observe_best_score(best.score);
                self.decision.decide(best)
            }
            Err(e) => {
                error!("任务 {}: {e}", job.id);
                RecognitionResult::error(ErrorKind::StorageError, e.to_string())
            }
        }
    }
}

/// 由操作员在终端中人工识别
pub struct ManualResolver<R, W> {
    input: R,
    output: W,
    quit: bool,
}

impl<R: BufRead + Send, W: Write + Send> ManualResolver<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output, quit: false }
    }

    fn ask(&mut self, job: &RecognitionJob) -> std::io::Result<Option<String>> {
        writeln!(self.output, "\n收到识别请求: {} (任务 {})", job.filename, job.id)?;
        writeln!(self.output, "图片位置: {}", job.image.path().display())?;
        write!(self.output, "请输入猫咪名字（skip 跳过，quit 退出）: ")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl<R: BufRead + Send, W: Write + Send> JobResolver for ManualResolver<R, W> {
    fn resolve(&mut self, job: &RecognitionJob) -> RecognitionResult {
        let answer = match self.ask(job) {
            Ok(answer) => answer,
            Err(e) => {
                return RecognitionResult::error(ErrorKind::WorkerFault, format!("无法读取操作员输入: {e}"));
            }
        };
        match answer.as_deref() {
            None | Some("quit") => {
                self.quit = true;
                RecognitionResult::Unmatched { nearest: None, score: 0.0, message: "识别服务正在关闭".to_string() }
            }
            Some("") | Some("skip") | Some(UNKNOWN_LABEL) => {
                RecognitionResult::Unmatched { nearest: None, score: 0.0, message: "操作员跳过了这张图片".to_string() }
            }
            Some(name) => {
                let decision = DecisionEngine::default();
                let tier = decision.tier(1.0);
                RecognitionResult::Matched {
                    name: name.to_string(),
                    score: 1.0,
                    tier,
                    message: format!("人工识别: {name}"),
                }
            }
        }
    }

    fn wants_shutdown(&self) -> bool {
        self.quit
    }
}

/// 识别线程配置
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// 跳过调用方已放弃等待且尚未开始的任务
    pub skip_abandoned: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self { skip_abandoned: true }
    }
}

/// 唯一的任务消费者
pub struct Worker {
    jobs: JobReceiver,
    results: Arc<ResultStore>,
    resolver: Box<dyn JobResolver>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(
        jobs: JobReceiver,
        results: Arc<ResultStore>,
        resolver: Box<dyn JobResolver>,
        options: WorkerOptions,
    ) -> Self {
        Self { jobs, results, resolver, options }
    }

    /// 在独立线程中启动识别循环
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new().name("recognition-worker".to_string()).spawn(move || self.run())
    }

    /// 识别循环，直到收到退出信号或队列关闭
    ///
    /// 退出前为队列中剩余的任务发布 [`ErrorKind::Cancelled`]，
    /// 之后才入队的任务的调用方会收到通道关闭。
    pub fn run(mut self) {
        info!("识别线程已启动，等待处理任务...");
        while let Some(job) = self.jobs.dequeue() {
            self.process(job);
            if self.resolver.wants_shutdown() {
                info!("识别后端请求退出");
                break;
            }
        }

        let Worker { jobs, results, .. } = self;
        for job in jobs.drain() {
            warn!("识别线程已停止，取消任务 {} ({})", job.id, job.filename);
            let id = job.id;
            let path = job.image.path().to_path_buf();
            if let Err(e) = job.image.close() {
                error!("无法删除临时文件 {}: {e}", path.display());
            }
            let result = RecognitionResult::error(ErrorKind::Cancelled, "识别服务已停止，任务未被处理");
            metrics::inc_job_count(result.metric_label());
            results.publish(id, result);
        }
        drop(jobs);
        let closed = results.close_all_waiting();
        if closed > 0 {
            warn!("关闭了 {closed} 个仍在等待的请求");
        }
        info!("识别线程退出");
    }

    /// 处理单个任务：解析、删除临时图片、发布结果
    ///
    /// 任何一个任务的失败都不会终止识别循环
    fn process(&mut self, job: RecognitionJob) {
        let id = job.id;
        let start = Instant::now();
        metrics::observe_queue_wait(job.submitted_at.elapsed());
        info!("开始处理任务 {id} ({})...", job.filename);

        let result = if self.options.skip_abandoned && self.results.is_abandoned(&id) {
            warn!("任务 {id} 的调用方已放弃等待，跳过");
            RecognitionResult::error(ErrorKind::Abandoned, "调用方已放弃等待，任务被跳过")
        } else {
            let resolver = &mut self.resolver;
            catch_unwind(AssertUnwindSafe(|| resolver.resolve(&job))).unwrap_or_else(|panic| {
                let msg = panic_message(&*panic);
                error!("处理任务 {id} 时发生严重错误: {msg}");
                RecognitionResult::error(ErrorKind::WorkerFault, format!("识别线程异常: {msg}"))
            })
        };

        let path = job.image.path().to_path_buf();
        if let Err(e) = job.image.close() {
            error!("无法删除临时文件 {}: {e}", path.display());
        }

        metrics::inc_job_count(result.metric_label());
        metrics::observe_job_duration(result.metric_label(), start.elapsed());
        info!("任务 {id} 完成: {} ({:.2}s)", result.metric_label(), start.elapsed().as_secs_f32());

        self.results.publish(id, result);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::job::{Status, TempImage};

    fn job(dir: &std::path::Path) -> RecognitionJob {
        RecognitionJob::new(TempImage::create(dir, "jpg", b"x").unwrap(), "cat.jpg")
    }

    #[test]
    fn manual_resolver_reads_names_skip_and_quit() {
        let dir = tempfile::tempdir().unwrap();
        let input = Cursor::new("Garfield\nskip\n\nquit\n");
        let mut output = vec![];
        let mut resolver = ManualResolver::new(input, &mut output);

        let result = resolver.resolve(&job(dir.path()));
        assert_eq!(result.matched_name(), Some("Garfield"));
        assert_eq!(result.score(), Some(1.0));
        assert!(!resolver.wants_shutdown());

        assert_eq!(resolver.resolve(&job(dir.path())).status(), Status::Unmatched);
        assert_eq!(resolver.resolve(&job(dir.path())).status(), Status::Unmatched);
        assert!(!resolver.wants_shutdown());

        assert_eq!(resolver.resolve(&job(dir.path())).status(), Status::Unmatched);
        assert!(resolver.wants_shutdown());
        drop(resolver);
        assert!(String::from_utf8(output).unwrap().contains("cat.jpg"));
    }

    #[test]
    fn manual_resolver_never_matches_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let input = Cursor::new(format!("{UNKNOWN_LABEL}\n"));
        let mut resolver = ManualResolver::new(input, std::io::sink());
        let result = resolver.resolve(&job(dir.path()));
        assert_eq!(result.status(), Status::Unmatched);
        assert!(!resolver.wants_shutdown());
    }

    #[test]
    fn manual_resolver_stops_at_end_of_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = ManualResolver::new(Cursor::new(""), std::io::sink());
        assert_eq!(resolver.resolve(&job(dir.path())).status(), Status::Unmatched);
        assert!(resolver.wants_shutdown());
    }
}
