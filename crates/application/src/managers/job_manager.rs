use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use datapipe_core::{DataPipeError, DataPipeResult, EntityFilter, Repository};
use datapipe_domain::{Job, JobId, JobStatus, SubmitId, Task, TaskId};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::EntityManager;

/// Job 状态变化监听器
///
/// 在每次状态转换持久化之后同步调用。监听器中的 panic 会被捕获并记录，
/// 不会影响调度循环。
pub trait JobListener: Send + Sync {
    fn on_status_change(&self, job: &Job);
}

impl<F> JobListener for F
where
    F: Fn(&Job) + Send + Sync,
{
    fn on_status_change(&self, job: &Job) {
        self(job)
    }
}

/// 全局监听器的注册句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    global: RwLock<Vec<(ListenerId, Arc<dyn JobListener>)>>,
    per_job: RwLock<HashMap<JobId, Vec<Arc<dyn JobListener>>>>,
}

pub struct JobManager {
    entities: EntityManager<Job>,
    listeners: Listeners,
    version: String,
}

impl JobManager {
    pub fn new(repository: Arc<dyn Repository<Job>>, version: impl Into<String>) -> Self {
        Self {
            entities: EntityManager::new(repository),
            listeners: Listeners::default(),
            version: version.into(),
        }
    }

    /// 注册全局监听器，所有 Job 的状态变化都会通知它
    pub async fn register_listener(&self, listener: Arc<dyn JobListener>) -> ListenerId {
        let id = ListenerId(self.listeners.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.global.write().await.push((id, listener));
        id
    }

    pub async fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut global = self.listeners.global.write().await;
        let before = global.len();
        global.retain(|(listener_id, _)| *listener_id != id);
        global.len() != before
    }

    /// 为一次提交创建 Job，`listeners` 只接收该 Job 的通知
    pub async fn create(
        &self,
        task: &Task,
        submit_id: &SubmitId,
        submit_entity_id: &str,
        force: bool,
        listeners: &[Arc<dyn JobListener>],
    ) -> DataPipeResult<Job> {
        let mut job = Job::new(
            &task.config_id,
            task.id.clone(),
            submit_id.clone(),
            submit_entity_id,
            force,
        );
        job.version = self.version.clone();
        self.entities.set(&job).await?;
        if !listeners.is_empty() {
            self.listeners
                .per_job
                .write()
                .await
                .insert(job.id.clone(), listeners.to_vec());
        }
        debug!("创建 Job {} (任务 {})", job.id, task.id);
        Ok(job)
    }

    /// 更新 Job 状态并通知监听器
    ///
    /// 非法的状态转换只记录警告并返回 `Ok(None)`，保证重复的取消或关闭是幂等的。
    pub async fn update_status(&self, id: &JobId, status: JobStatus) -> DataPipeResult<Option<Job>> {
        self.transition(id, status, Vec::new()).await
    }

    /// 将 RUNNING 的 Job 标记为失败并记录错误堆栈
    pub async fn fail(&self, id: &JobId, stacktrace: Vec<String>) -> DataPipeResult<Option<Job>> {
        self.transition(id, JobStatus::Failed, stacktrace).await
    }

    async fn transition(
        &self,
        id: &JobId,
        status: JobStatus,
        stacktrace: Vec<String>,
    ) -> DataPipeResult<Option<Job>> {
        let result = self
            .entities
            .update(id.as_str(), |job| {
                job.transition(status)?;
                job.stacktrace.extend(stacktrace);
                Ok(())
            })
            .await;

        match result {
            Ok(job) => {
                debug!("Job {} 状态变为 {}", job.id, job.status);
                self.notify(&job).await;
                Ok(Some(job))
            }
            Err(DataPipeError::InvalidStatusTransition { from, to }) => {
                warn!("忽略 Job {} 的非法状态转换: {} -> {}", id, from, to);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn notify(&self, job: &Job) {
        let global: Vec<Arc<dyn JobListener>> = self
            .listeners
            .global
            .read()
            .await
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        let per_job: Vec<Arc<dyn JobListener>> = if job.is_finished() {
            self.listeners.per_job.write().await.remove(&job.id).unwrap_or_default()
        } else {
            self.listeners
                .per_job
                .read()
                .await
                .get(&job.id)
                .cloned()
                .unwrap_or_default()
        };

        for listener in global.iter().chain(per_job.iter()) {
            if catch_unwind(AssertUnwindSafe(|| listener.on_status_change(job))).is_err() {
                error!("Job {} 的状态监听器发生panic，已忽略", job.id);
            }
        }
    }

    pub async fn get(&self, id: &JobId) -> DataPipeResult<Job> {
        self.entities.get(id.as_str()).await
    }

    pub async fn get_all(&self) -> DataPipeResult<Vec<Job>> {
        let mut jobs = self.entities.get_all().await?;
        jobs.sort_by_key(|j| j.creation_date);
        Ok(jobs)
    }

    pub async fn get_all_by(&self, filters: &[EntityFilter]) -> DataPipeResult<Vec<Job>> {
        let mut jobs = self.entities.get_all_by(filters).await?;
        jobs.sort_by_key(|j| j.creation_date);
        Ok(jobs)
    }

    pub async fn get_by_submit_id(&self, submit_id: &SubmitId) -> DataPipeResult<Vec<Job>> {
        self.get_all_by(&[EntityFilter::new("submit_id", submit_id.as_str())]).await
    }

    /// 任务最近创建的 Job
    pub async fn get_latest(&self, task_id: &TaskId) -> DataPipeResult<Option<Job>> {
        let jobs = self
            .entities
            .get_all_by(&[EntityFilter::new("task_id", task_id.as_str())])
            .await?;
        Ok(jobs.into_iter().max_by_key(|j| j.creation_date))
    }

    /// 删除已结束的 Job，未结束的 Job 返回 [`DataPipeError::JobNotDeletable`]
    pub async fn delete(&self, id: &JobId) -> DataPipeResult<()> {
        let job = self.get(id).await?;
        if !job.is_finished() {
            return Err(DataPipeError::JobNotDeletable { id: id.to_string() });
        }
        self.entities.delete(id.as_str()).await?;
        self.listeners.per_job.write().await.remove(id);
        Ok(())
    }

    pub async fn delete_many(&self, ids: &[JobId]) -> DataPipeResult<()> {
        for id in ids {
            let job = self.get(id).await?;
            if !job.is_finished() {
                return Err(DataPipeError::JobNotDeletable { id: id.to_string() });
            }
        }
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }

    pub async fn delete_all(&self) -> DataPipeResult<()> {
        self.entities.delete_all().await?;
        self.listeners.per_job.write().await.clear();
        Ok(())
    }
}
