use std::sync::LazyLock;
use std::time::Duration;

use prometheus::*;

static METRIC_JOB_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("catid_job_count", "count of processed recognition jobs", &["status"])
        .unwrap()
});

static METRIC_JOB_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "catid_job_duration",
        "duration of the per-job processing in seconds",
        &["status"]
    )
    .unwrap()
});

static METRIC_QUEUE_WAIT: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("catid_queue_wait", "time a job spent in the queue in seconds").unwrap()
});

static METRIC_BEST_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "catid_best_score",
        "similarity of the best match per job",
        (-4..=20).map(|x| x as f64 * 0.05).collect()
    )
    .unwrap()
});

static METRIC_SUBMISSION_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "catid_submission_count",
        "count of recognition submissions by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// 增加已处理任务计数
pub fn inc_job_count(status: &str) {
    METRIC_JOB_COUNT.with_label_values(&[status]).inc();
}

pub fn observe_job_duration(status: &str, duration: Duration) {
    METRIC_JOB_DURATION.with_label_values(&[status]).observe(duration.as_secs_f64());
}

pub fn observe_queue_wait(duration: Duration) {
    METRIC_QUEUE_WAIT.observe(duration.as_secs_f64());
}

pub fn observe_best_score(score: f32) {
    METRIC_BEST_SCORE.observe(score as f64);
}

/// 增加提交计数，`outcome` 为 ok / invalid / timeout / closed
pub fn inc_submission_count(outcome: &str) {
    METRIC_SUBMISSION_COUNT.with_label_values(&[outcome]).inc();
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&gather()).unwrap_or_else(|e| format!("# failed to encode metrics: {e}"))
}
