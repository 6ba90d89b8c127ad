use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use catid::decision::DecisionEngine;
use catid::extractor::{ExtractError, ExtractorHost, FeatureExtractor};
use catid::job::{ErrorKind, FeatureVector, RecognitionJob, RecognitionResult, Status, TempImage};
use catid::pipeline::{InputError, Pipeline, PipelineOptions, SubmitError};
use catid::queue::job_queue;
use catid::results::ResultStore;
use catid::store::{Identity, MemoryIdentityStore};
use catid::utils::suffix_regex;
use catid::worker::{AutoResolver, JobResolver, ManualResolver, Worker, WorkerOptions};
use rstest::*;
use tempfile::TempDir;

/// 按文件名决定结果的识别后端，并记录处理过的任务
#[derive(Clone, Default)]
struct Scripted {
    seen: Arc<Mutex<Vec<String>>>,
    /// 处理任务时临时图片是否存在
    image_existed: Arc<Mutex<Vec<(PathBuf, bool)>>>,
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl JobResolver for Scripted {
    fn resolve(&mut self, job: &RecognitionJob) -> RecognitionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(job.filename.clone());
        let path = job.image.path().to_path_buf();
        let exists = path.exists();
        self.image_existed.lock().unwrap().push((path, exists));
        thread::sleep(self.delay);
        if job.filename.starts_with("boom") {
            panic!("模型崩溃");
        }
        RecognitionResult::Unmatched { nearest: None, score: 0.1, message: job.filename.clone() }
    }
}

#[fixture]
fn temp_dir() -> TempDir {
    tempfile::tempdir().unwrap()
}

fn options(dir: &Path, timeout: Duration) -> PipelineOptions {
    PipelineOptions {
        timeout,
        temp_dir: dir.join("temp_recognition"),
        suffix: suffix_regex("png,jpg,jpeg,gif,webp").unwrap(),
        worker: WorkerOptions::default(),
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not met in time");
}

#[rstest]
fn worker_processes_jobs_in_fifo_order(temp_dir: TempDir) {
    let (queue, jobs) = job_queue();
    for name in ["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg"] {
        let image = TempImage::create(temp_dir.path(), "jpg", b"cat").unwrap();
        queue.enqueue(RecognitionJob::new(image, name)).unwrap();
    }
    queue.stop();

    let resolver = Scripted::default();
    let seen = resolver.seen.clone();
    Worker::new(jobs, Arc::new(ResultStore::new()), Box::new(resolver), WorkerOptions::default()).run();

    assert_eq!(*seen.lock().unwrap(), vec!["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg"]);
}

#[rstest]
#[tokio::test]
async fn worker_survives_panicking_job(temp_dir: TempDir) {
    let (pipeline, worker) =
        Pipeline::start(Box::new(Scripted::default()), options(temp_dir.path(), Duration::from_secs(5))).unwrap();

    let result = pipeline.submit(Some("boom.jpg"), b"cat").await.unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::WorkerFault));

    let result = pipeline.submit(Some("fine.jpg"), b"cat").await.unwrap();
    assert_eq!(result.status(), Status::Unmatched);
    assert_eq!(result.message(), "fine.jpg");

    pipeline.shutdown();
    worker.join().unwrap();
}

#[rstest]
#[tokio::test]
async fn temp_image_is_deleted_after_every_job(temp_dir: TempDir) {
    let resolver = Scripted::default();
    let existed = resolver.image_existed.clone();
    let (pipeline, worker) =
        Pipeline::start(Box::new(resolver), options(temp_dir.path(), Duration::from_secs(5))).unwrap();

    pipeline.submit(Some("a.jpg"), b"cat").await.unwrap();
    pipeline.submit(Some("boom.png"), b"cat").await.unwrap();

    for (path, existed) in existed.lock().unwrap().iter() {
        assert!(existed, "{} should exist while the job runs", path.display());
        assert!(!path.exists(), "{} should be deleted", path.display());
    }
    pipeline.shutdown();
    worker.join().unwrap();
}

#[rstest]
#[case(None, InputError::InvalidType)]
#[case(Some(""), InputError::InvalidType)]
#[case(Some("cat.txt"), InputError::InvalidType)]
#[case(Some("cat"), InputError::InvalidType)]
#[tokio::test]
async fn invalid_input_never_reaches_the_queue(
    temp_dir: TempDir,
    #[case] filename: Option<&str>,
    #[case] expected: InputError,
) {
    let resolver = Scripted::default();
    let calls = resolver.calls.clone();
    let (pipeline, worker) =
        Pipeline::start(Box::new(resolver), options(temp_dir.path(), Duration::from_secs(5))).unwrap();

    match pipeline.submit(filename, b"cat").await {
        Err(SubmitError::Input(e)) => assert_eq!(e, expected),
        other => panic!("unexpected result: {other:?}"),
    }
    match pipeline.submit(Some("cat.JPG"), b"").await {
        Err(SubmitError::Input(e)) => assert_eq!(e, InputError::Empty),
        other => panic!("unexpected result: {other:?}"),
    }

    pipeline.shutdown();
    worker.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn timed_out_job_leaves_orphan_and_skips_abandoned(temp_dir: TempDir) {
    let resolver = Scripted { delay: Duration::from_millis(300), ..Default::default() };
    let calls = resolver.calls.clone();
    let (pipeline, worker) =
        Pipeline::start(Box::new(resolver), options(temp_dir.path(), Duration::from_millis(100))).unwrap();

    let (a, b) = tokio::join!(pipeline.submit(Some("a.jpg"), b"cat"), pipeline.submit(Some("b.jpg"), b"cat"));
    assert!(matches!(a, Err(SubmitError::Timeout)));
    assert!(matches!(b, Err(SubmitError::Timeout)));

    // 第一个任务已经开始处理，第二个任务被跳过，两者的结果都成为孤儿
    let results = pipeline.results().clone();
    wait_for(|| results.ready_count() == 2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(results.evict_expired(Duration::from_secs(60)), 0);
    assert_eq!(results.evict_expired(Duration::ZERO), 2);
    assert_eq!(results.ready_count(), 0);

    pipeline.shutdown();
    worker.join().unwrap();
}

#[rstest]
#[tokio::test]
async fn abandoned_jobs_can_still_be_processed(temp_dir: TempDir) {
    let resolver = Scripted { delay: Duration::from_millis(300), ..Default::default() };
    let calls = resolver.calls.clone();
    let mut options = options(temp_dir.path(), Duration::from_millis(100));
    options.worker.skip_abandoned = false;
    let (pipeline, worker) = Pipeline::start(Box::new(resolver), options).unwrap();

    let _ = tokio::join!(pipeline.submit(Some("a.jpg"), b"cat"), pipeline.submit(Some("b.jpg"), b"cat"));
    pipeline.shutdown();
    worker.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[rstest]
#[tokio::test]
async fn queued_jobs_are_answered_when_operator_quits(temp_dir: TempDir) {
    let resolver = ManualResolver::new(Cursor::new("quit\n"), std::io::sink());
    let (pipeline, worker) =
        Pipeline::start(Box::new(resolver), options(temp_dir.path(), Duration::from_secs(5))).unwrap();

    let start = Instant::now();
    let (a, b) = tokio::join!(pipeline.submit(Some("a.jpg"), b"cat"), pipeline.submit(Some("b.jpg"), b"cat"));
    assert!(start.elapsed() < Duration::from_secs(2), "waited {:?}", start.elapsed());

    assert_eq!(a.unwrap().status(), Status::Unmatched);
    // 第二个任务要么被取消，要么在识别线程退出后才入队
    match b {
        Ok(result) => assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled)),
        Err(SubmitError::Closed) => {}
        Err(e) => panic!("unexpected error: {e:?}"),
    }

    worker.join().unwrap();
    assert_eq!(pipeline.results().waiting_count(), 0);
    assert!(fs_is_empty(&temp_dir.path().join("temp_recognition")));
}

#[rstest]
fn operator_quit_cancels_remaining_queued_jobs(temp_dir: TempDir) {
    let (queue, jobs) = job_queue();
    let results = Arc::new(ResultStore::new());
    let mut receivers = vec![];
    for name in ["1.jpg", "2.jpg", "3.jpg"] {
        let job = RecognitionJob::new(TempImage::create(temp_dir.path(), "jpg", b"cat").unwrap(), name);
        receivers.push((job.id, results.subscribe(job.id)));
        queue.enqueue(job).unwrap();
    }

    let resolver = ManualResolver::new(Cursor::new("Tom\nquit\n"), std::io::sink());
    Worker::new(jobs, results.clone(), Box::new(resolver), WorkerOptions::default()).run();

    let kinds = receivers
        .into_iter()
        .map(|(_, mut rx)| rx.try_recv().unwrap().error_kind())
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec![None, None, Some(ErrorKind::Cancelled)]);
    assert_eq!(results.waiting_count(), 0);
    assert!(queue.enqueue(RecognitionJob::new(
        TempImage::create(temp_dir.path(), "jpg", b"cat").unwrap(),
        "late.jpg"
    ))
    .is_err());
}

fn fs_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut entries| entries.next().is_none()).unwrap_or(true)
}

#[rstest]
#[tokio::test]
async fn submit_after_shutdown_is_rejected(temp_dir: TempDir) {
    let (pipeline, worker) =
        Pipeline::start(Box::new(Scripted::default()), options(temp_dir.path(), Duration::from_secs(1))).unwrap();
    pipeline.shutdown();
    worker.join().unwrap();

    assert!(matches!(pipeline.submit(Some("a.jpg"), b"cat").await, Err(SubmitError::Closed)));
    assert_eq!(pipeline.results().waiting_count(), 0);
}

/// 固定输出的特征提取器
struct FixedExtractor(Option<FeatureVector>);

impl FeatureExtractor for FixedExtractor {
    fn extract(&mut self, _image: &Path) -> Result<Option<FeatureVector>, ExtractError> {
        Ok(self.0.clone())
    }
}

/// 总是出错的特征提取器
struct FailingExtractor;

impl FeatureExtractor for FailingExtractor {
    fn extract(&mut self, _image: &Path) -> Result<Option<FeatureVector>, ExtractError> {
        Err(ExtractError::Command { status: "exit status: 1".to_string(), stderr: "model not loaded".to_string() })
    }
}

/// 每次调用都超过宿主超时的特征提取器
struct HangingExtractor;

impl FeatureExtractor for HangingExtractor {
    fn extract(&mut self, _image: &Path) -> Result<Option<FeatureVector>, ExtractError> {
        thread::sleep(Duration::from_millis(300));
        Ok(Some(vec![1.0, 0.0]))
    }
}

fn auto_with(
    extractor: Box<dyn FeatureExtractor>,
    timeout: Duration,
    identities: Vec<Identity>,
) -> Box<dyn JobResolver> {
    let host = ExtractorHost::spawn(extractor, timeout).unwrap();
    Box::new(AutoResolver::new(host, Box::new(MemoryIdentityStore::new(identities)), DecisionEngine::default()))
}

fn auto(vector: Option<FeatureVector>, identities: Vec<Identity>) -> Box<dyn JobResolver> {
    auto_with(Box::new(FixedExtractor(vector)), Duration::from_secs(5), identities)
}

fn cat(name: &str, vectors: Vec<FeatureVector>) -> Identity {
    Identity { name: name.to_string(), vectors }
}

#[rstest]
#[case::empty_store(Some(vec![1.0, 0.0]), vec![], Some(ErrorKind::StorageError))]
#[case::no_vectors(Some(vec![1.0, 0.0]), vec![cat("Tom", vec![])], Some(ErrorKind::StorageError))]
#[case::not_detected(None, vec![cat("Tom", vec![vec![1.0, 0.0]])], Some(ErrorKind::DetectionFailure))]
#[case::matched(Some(vec![1.0, 0.0]), vec![cat("Tom", vec![vec![1.0, 0.0]])], None)]
#[tokio::test]
async fn automatic_resolution(
    temp_dir: TempDir,
    #[case] vector: Option<FeatureVector>,
    #[case] identities: Vec<Identity>,
    #[case] expected: Option<ErrorKind>,
) {
    let (pipeline, worker) =
        Pipeline::start(auto(vector, identities), options(temp_dir.path(), Duration::from_secs(5))).unwrap();
    let result = pipeline.submit(Some("cat.jpg"), b"cat").await.unwrap();
    assert_eq!(result.error_kind(), expected);
    pipeline.shutdown();
    worker.join().unwrap();
}

#[rstest]
#[tokio::test]
async fn best_identity_wins_across_reference_vectors(temp_dir: TempDir) {
    let identities = vec![
        cat("Tom", vec![vec![0.0, 1.0], vec![0.6, 0.8]]),
        cat("Jerry", vec![vec![0.96, 0.28]]),
        cat("Spike", vec![vec![-1.0, 0.0]]),
    ];
    let (pipeline, worker) =
        Pipeline::start(auto(Some(vec![1.0, 0.0]), identities), options(temp_dir.path(), Duration::from_secs(5)))
            .unwrap();

    let result = pipeline.submit(Some("cat.jpg"), b"cat").await.unwrap();
    assert_eq!(result.matched_name(), Some("Jerry"));
    assert!((result.score().unwrap() - 0.96).abs() < 1e-5);

    pipeline.shutdown();
    worker.join().unwrap();
}

#[rstest]
#[case::extractor_error(Box::new(FailingExtractor), Duration::from_secs(5), "model not loaded")]
#[case::extractor_timeout(Box::new(HangingExtractor), Duration::from_millis(50), "超时")]
#[tokio::test]
async fn extractor_problems_are_extraction_failures(
    temp_dir: TempDir,
    #[case] extractor: Box<dyn FeatureExtractor>,
    #[case] extract_timeout: Duration,
    #[case] message: &str,
) {
    let identities = vec![cat("Tom", vec![vec![1.0, 0.0]])];
    let (pipeline, worker) = Pipeline::start(
        auto_with(extractor, extract_timeout, identities),
        options(temp_dir.path(), Duration::from_secs(5)),
    )
    .unwrap();

    let result = pipeline.submit(Some("cat.jpg"), b"cat").await.unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::ExtractionFailure));
    assert!(result.message().contains(message), "{}", result.message());

    // 提取器出错不影响后续任务
    let result = pipeline.submit(Some("again.jpg"), b"cat").await.unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::ExtractionFailure));

    pipeline.shutdown();
    worker.join().unwrap();
}
