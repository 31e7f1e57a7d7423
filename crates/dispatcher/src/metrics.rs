use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

use datapipe_domain::{Job, JobStatus};

/// 调度指标
///
/// 只负责上报，不安装任何 exporter，由嵌入方决定使用哪种 recorder。
#[derive(Clone)]
pub struct DispatcherMetrics {
    jobs_submitted: Counter,
    jobs_completed: Counter,
    jobs_failed: Counter,
    jobs_skipped: Counter,
    jobs_abandoned: Counter,
    job_duration: Histogram,
    available_workers: Gauge,
    pending_jobs: Gauge,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self {
            jobs_submitted: counter!("datapipe_jobs_submitted_total"),
            jobs_completed: counter!("datapipe_jobs_completed_total"),
            jobs_failed: counter!("datapipe_jobs_failed_total"),
            jobs_skipped: counter!("datapipe_jobs_skipped_total"),
            jobs_abandoned: counter!("datapipe_jobs_abandoned_total"),
            job_duration: histogram!("datapipe_job_duration_seconds"),
            available_workers: gauge!("datapipe_available_workers"),
            pending_jobs: gauge!("datapipe_pending_jobs"),
        }
    }

    pub fn record_submitted(&self, count: usize) {
        self.jobs_submitted.increment(count as u64);
    }

    /// 按终态记录 Job 结果
    pub fn record_finished(&self, job: &Job) {
        match job.status {
            JobStatus::Completed => self.jobs_completed.increment(1),
            JobStatus::Failed => self.jobs_failed.increment(1),
            JobStatus::Skipped => self.jobs_skipped.increment(1),
            JobStatus::Abandoned => self.jobs_abandoned.increment(1),
            _ => {}
        }
        if let Some(ms) = job.execution_duration_ms() {
            self.job_duration.record(ms as f64 / 1000.0);
        }
    }

    pub fn set_available_workers(&self, count: usize) {
        self.available_workers.set(count as f64);
    }

    pub fn set_pending_jobs(&self, count: usize) {
        self.pending_jobs.set(count as f64);
    }
}

impl Default for DispatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}
