use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use datapipe_application::{JobListener, Managers};
use datapipe_core::{DataPipeError, DataPipeResult, EntityFilter, FailurePolicy, JobMode};
use datapipe_domain::{order_tasks, Job, JobId, JobStatus, PipelineId, ScenarioId, SubmitId, Task, TaskId};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::dispatcher::JobDispatcher;
use crate::metrics::DispatcherMetrics;
use crate::queue::{JobQueue, QueuedJob};

/// 可以提交执行的实体
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submittable {
    Task(TaskId),
    Pipeline(PipelineId),
    Scenario(ScenarioId),
}

impl fmt::Display for Submittable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Submittable::Task(id) => write!(f, "{id}"),
            Submittable::Pipeline(id) => write!(f, "{id}"),
            Submittable::Scenario(id) => write!(f, "{id}"),
        }
    }
}

impl From<TaskId> for Submittable {
    fn from(id: TaskId) -> Self {
        Submittable::Task(id)
    }
}

impl From<PipelineId> for Submittable {
    fn from(id: PipelineId) -> Self {
        Submittable::Pipeline(id)
    }
}

impl From<ScenarioId> for Submittable {
    fn from(id: ScenarioId) -> Self {
        Submittable::Scenario(id)
    }
}

/// 编排器
///
/// 把任务、管道或场景转换为按依赖排序的 Job 并放入队列，决定哪些 Job
/// 可以跳过，并在 Job 结束后处理取消和失败的级联。
pub struct Orchestrator {
    managers: Managers,
    queue: Arc<JobQueue>,
    failure_policy: RwLock<FailurePolicy>,
    poll_interval: Duration,
    metrics: DispatcherMetrics,
}

impl Orchestrator {
    pub fn new(
        managers: Managers,
        failure_policy: FailurePolicy,
        poll_interval: Duration,
        metrics: DispatcherMetrics,
    ) -> Self {
        Self {
            managers,
            queue: Arc::new(JobQueue::new()),
            failure_policy: RwLock::new(failure_policy),
            poll_interval,
            metrics,
        }
    }

    pub fn managers(&self) -> &Managers {
        &self.managers
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &DispatcherMetrics {
        &self.metrics
    }

    pub async fn set_failure_policy(&self, failure_policy: FailurePolicy) {
        *self.failure_policy.write().await = failure_policy;
    }

    /// 为实体中的每个任务创建 Job 并入队，返回的 Job 处于 PENDING 状态
    ///
    /// 场景按管道分别提交，每个管道对应一个 SubmitId。
    /// 任务图有环时在创建任何 Job 之前返回错误。
    pub async fn submit(
        &self,
        submittable: &Submittable,
        listeners: &[Arc<dyn JobListener>],
        force: bool,
    ) -> DataPipeResult<Vec<Job>> {
        let mut submissions = Vec::new();
        for (entity_id, tasks) in self.resolve(submittable).await? {
            if tasks.is_empty() {
                debug!("{} 没有可执行的任务", entity_id);
                continue;
            }
            submissions.push((entity_id, order_tasks(&tasks)?));
        }

        let mut jobs = Vec::new();
        for (entity_id, tasks) in submissions {
            let submit_id = SubmitId::new_submission();
            for task in tasks {
                jobs.push(self.enqueue(task, &submit_id, &entity_id, force, listeners).await?);
            }
            info!("提交 {}，SubmitId {}", entity_id, submit_id);
        }

        self.metrics.record_submitted(jobs.len());
        self.metrics.set_pending_jobs(self.queue.pending_len().await);
        Ok(jobs)
    }

    async fn resolve(&self, submittable: &Submittable) -> DataPipeResult<Vec<(String, Vec<Task>)>> {
        match submittable {
            Submittable::Task(id) => {
                let task = self.managers.tasks.get(id).await?;
                Ok(vec![(id.to_string(), vec![task])])
            }
            Submittable::Pipeline(id) => Ok(vec![(id.to_string(), self.pipeline_tasks(id).await?)]),
            Submittable::Scenario(id) => {
                let scenario = self.managers.scenarios.get(id).await?;
                let mut groups = Vec::with_capacity(scenario.pipeline_ids.len());
                for pipeline_id in &scenario.pipeline_ids {
                    groups.push((pipeline_id.to_string(), self.pipeline_tasks(pipeline_id).await?));
                }
                Ok(groups)
            }
        }
    }

    async fn pipeline_tasks(&self, id: &PipelineId) -> DataPipeResult<Vec<Task>> {
        let pipeline = self.managers.pipelines.get(id).await?;
        let mut tasks = Vec::with_capacity(pipeline.task_ids.len());
        for task_id in &pipeline.task_ids {
            tasks.push(self.managers.tasks.get(task_id).await?);
        }
        Ok(tasks)
    }

    async fn enqueue(
        &self,
        task: Task,
        submit_id: &SubmitId,
        entity_id: &str,
        force: bool,
        listeners: &[Arc<dyn JobListener>],
    ) -> DataPipeResult<Job> {
        let jobs = &self.managers.jobs;
        let job = jobs.create(&task, submit_id, entity_id, force, listeners).await?;
        for output in &task.output_ids {
            self.managers.data.lock_edit(output).await?;
        }
        let job = jobs
            .update_status(&job.id, JobStatus::Pending)
            .await?
            .unwrap_or(job);
        self.queue
            .push(QueuedJob {
                job_id: job.id.clone(),
                submit_id: submit_id.clone(),
                task,
                force,
            })
            .await;
        Ok(job)
    }

    /// 取出下一个需要执行的 Job
    ///
    /// 可跳过的任务在出队时判断：输出都在有效期内且未强制执行时直接标记为 SKIPPED。
    pub async fn next_ready(&self) -> DataPipeResult<Option<QueuedJob>> {
        loop {
            let Some(entry) = self.queue.pop_ready(&self.managers.data).await? else {
                return Ok(None);
            };
            self.metrics.set_pending_jobs(self.queue.pending_len().await);
            if !self.should_skip(&entry).await? {
                return Ok(Some(entry));
            }

            info!("任务 {} 的输出仍然有效，跳过 Job {}", entry.task.config_id, entry.job_id);
            self.skip(&entry).await?;
        }
    }

    /// 把已出队的 Job 标记为 SKIPPED 并移出执行集合
    ///
    /// 出队后被取消的 Job 不能再跳过，按取消处理，放弃依赖它的 Job。
    pub async fn skip(&self, entry: &QueuedJob) -> DataPipeResult<()> {
        match self
            .managers
            .jobs
            .update_status(&entry.job_id, JobStatus::Skipped)
            .await?
        {
            Some(job) => {
                self.metrics.record_finished(&job);
                self.release_locks(entry).await;
                self.queue.finish(&entry.job_id).await;
                Ok(())
            }
            None => {
                let job = self.managers.jobs.get(&entry.job_id).await?;
                debug!("Job {} 处于 {} 状态，不再跳过", job.id, job.status);
                self.on_job_finished(entry, &job).await
            }
        }
    }

    async fn should_skip(&self, entry: &QueuedJob) -> DataPipeResult<bool> {
        if !entry.task.skippable || entry.force || entry.task.output_ids.is_empty() {
            return Ok(false);
        }
        let now = Utc::now();
        for output in &entry.task.output_ids {
            // 输出在提交时已被本次提交锁定，这里只看数据是否有效
            if !self.managers.data.get(output).await?.is_valid_at(now) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 调度器在 Job 执行结束后调用
    ///
    /// 级联处理在 Job 移出执行集合之前完成，避免下游 Job 在此期间被取出。
    pub async fn on_job_finished(&self, entry: &QueuedJob, job: &Job) -> DataPipeResult<()> {
        self.metrics.record_finished(job);

        let policy = *self.failure_policy.read().await;
        let cascade = match job.status {
            JobStatus::Failed if policy == FailurePolicy::Abandon => {
                self.abandon_dependents(entry).await
            }
            JobStatus::Cancelled | JobStatus::Abandoned => {
                // 出队之后、执行之前被取消的 Job 没有经过执行流程
                self.release_locks(entry).await;
                self.abandon_dependents(entry).await
            }
            _ => Ok(()),
        };
        self.queue.finish(&entry.job_id).await;
        self.metrics.set_pending_jobs(self.queue.pending_len().await);
        cascade
    }

    /// 取消 Job
    ///
    /// 只有尚未开始执行的 Job 可以取消，同一次提交中依赖它的 Job 被放弃。
    /// 执行中或已结束的 Job 保持原状态。
    pub async fn cancel_job(&self, job_id: &JobId) -> DataPipeResult<Job> {
        let job = self.managers.jobs.get(job_id).await?;
        if job.is_finished() || job.is_running() {
            warn!("Job {} 处于 {} 状态，不能取消", job_id, job.status);
            return Ok(job);
        }

        let Some(entry) = self.queue.remove(job_id).await else {
            // 已出队但还没进入 RUNNING，由执行流程在结束时释放锁
            return Ok(self
                .managers
                .jobs
                .update_status(job_id, JobStatus::Cancelled)
                .await?
                .unwrap_or(job));
        };

        let cancelled = self
            .managers
            .jobs
            .update_status(job_id, JobStatus::Cancelled)
            .await?
            .unwrap_or(job);
        info!("已取消 Job {}", job_id);
        self.release_locks(&entry).await;
        self.abandon_dependents(&entry).await?;
        self.metrics.set_pending_jobs(self.queue.pending_len().await);
        Ok(cancelled)
    }

    async fn abandon_dependents(&self, root: &QueuedJob) -> DataPipeResult<()> {
        for entry in self.queue.take_dependents(root).await {
            self.abandon(&entry).await?;
        }
        Ok(())
    }

    /// 放弃队列中所有等待执行的 Job
    pub async fn abandon_pending(&self) -> DataPipeResult<usize> {
        let entries = self.queue.drain_pending().await;
        for entry in &entries {
            self.abandon(entry).await?;
        }
        self.metrics.set_pending_jobs(0);
        Ok(entries.len())
    }

    async fn abandon(&self, entry: &QueuedJob) -> DataPipeResult<()> {
        if let Some(job) = self
            .managers
            .jobs
            .update_status(&entry.job_id, JobStatus::Abandoned)
            .await?
        {
            warn!("放弃 Job {} (任务 {})", job.id, entry.task.config_id);
            self.metrics.record_finished(&job);
        }
        self.release_locks(entry).await;
        Ok(())
    }

    /// 解锁没有被其他排队 Job 占用的输出
    async fn release_locks(&self, entry: &QueuedJob) {
        for output in &entry.task.output_ids {
            if self.queue.is_claimed(output, &entry.job_id).await {
                continue;
            }
            if let Err(e) = self.managers.data.unlock_edit(output).await {
                warn!("Job {} 解锁输出 {} 失败: {}", entry.job_id, output, e);
            }
        }
    }

    pub async fn get_jobs(&self, filters: &[EntityFilter]) -> DataPipeResult<Vec<Job>> {
        self.managers.jobs.get_all_by(filters).await
    }

    /// 重新加载 Job 的最新状态
    pub async fn refresh(&self, jobs: &[Job]) -> DataPipeResult<Vec<Job>> {
        let mut refreshed = Vec::with_capacity(jobs.len());
        for job in jobs {
            refreshed.push(self.managers.jobs.get(&job.id).await?);
        }
        Ok(refreshed)
    }

    /// 等待所有 Job 结束，超时后返回当时的状态
    ///
    /// 开发模式没有后台循环，每次轮询都由等待方取出并执行新就绪的 Job。
    pub async fn wait_for(
        &self,
        dispatcher: &dyn JobDispatcher,
        jobs: &[Job],
        timeout: Option<Duration>,
    ) -> DataPipeResult<Vec<Job>> {
        let wait = async {
            loop {
                if dispatcher.mode() == JobMode::Development {
                    dispatcher.dispatch().await?;
                }
                let current = self.refresh(jobs).await?;
                if current.iter().all(Job::is_finished) {
                    return Ok::<_, DataPipeError>(current);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match timeout {
            None => wait.await,
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("等待 {} 个 Job 结束超时 ({:?})", jobs.len(), limit);
                    self.refresh(jobs).await
                }
            },
        }
    }
}
