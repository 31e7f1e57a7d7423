use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use datapipe_application::Managers;
use datapipe_core::{DataPipeError, DataPipeResult, FunctionRegistry, TaskFunction};
use datapipe_domain::{DataNodeId, EditOptions, Job, JobId, JobStatus, Task};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// 任务函数的调用方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// 在当前线程中直接调用
    Inline,
    /// 在 tokio 阻塞线程池中调用，不占用异步工作线程
    Blocking,
}

/// 单个 Job 的执行器
///
/// 负责 RUNNING 转换、读取输入、调用函数、写入输出、解锁输出以及最终状态，
/// 任务函数的错误和 panic 只会让 Job 失败，不会向上传播。
#[derive(Clone)]
pub struct JobRunner {
    managers: Managers,
    functions: FunctionRegistry,
    mode: ExecutionMode,
    running_jobs: Arc<RwLock<HashMap<JobId, Instant>>>,
}

enum Outcome {
    Completed,
    Failed(Vec<String>),
}

impl JobRunner {
    pub fn new(managers: Managers, functions: FunctionRegistry, mode: ExecutionMode) -> Self {
        Self {
            managers,
            functions,
            mode,
            running_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub async fn running_count(&self) -> usize {
        self.running_jobs.read().await.len()
    }

    pub async fn is_running(&self, id: &JobId) -> bool {
        self.running_jobs.read().await.contains_key(id)
    }

    /// 执行 Job，返回执行后的 Job
    ///
    /// Job 已不处于 PENDING（例如被取消）时不会执行，直接返回当前状态。
    pub async fn run(&self, job_id: &JobId) -> DataPipeResult<Job> {
        let Some(job) = self.managers.jobs.update_status(job_id, JobStatus::Running).await? else {
            debug!("Job {} 不能进入 RUNNING，跳过执行", job_id);
            return self.managers.jobs.get(job_id).await;
        };
        let task = match self.managers.tasks.get(&job.task_id).await {
            Ok(task) => task,
            Err(e) => {
                error!("Job {} 的任务 {} 无法加载: {}", job.id, job.task_id, e);
                return self.finish(&job.id, self.managers.jobs.fail(&job.id, vec![e.to_string()]).await?).await;
            }
        };

        self.running_jobs.write().await.insert(job.id.clone(), Instant::now());
        info!("开始执行 Job {} (任务 {}, 函数 {})", job.id, task.config_id, task.function_name);
        let started = Instant::now();

        for output in &task.output_ids {
            if let Err(e) = self.managers.data.lock_edit(output).await {
                warn!("Job {} 锁定输出 {} 失败: {}", job.id, output, e);
            }
        }

        let mut written = Vec::with_capacity(task.output_ids.len());
        let outcome = self.execute(&job, &task, &mut written).await;

        for output in task.output_ids.iter().filter(|id| !written.contains(*id)) {
            if let Err(e) = self.managers.data.unlock_edit(output).await {
                error!("Job {} 解锁输出 {} 失败: {}", job.id, output, e);
            }
        }
        self.running_jobs.write().await.remove(&job.id);

        let finished = match outcome {
            Outcome::Completed => {
                info!("Job {} 执行成功，耗时 {:?}", job.id, started.elapsed());
                self.managers.jobs.update_status(&job.id, JobStatus::Completed).await?
            }
            Outcome::Failed(stacktrace) => {
                error!("Job {} 执行失败: {}", job.id, stacktrace.join(": "));
                self.managers.jobs.fail(&job.id, stacktrace).await?
            }
        };
        self.finish(&job.id, finished).await
    }

    async fn finish(&self, id: &JobId, finished: Option<Job>) -> DataPipeResult<Job> {
        match finished {
            Some(job) => Ok(job),
            None => self.managers.jobs.get(id).await,
        }
    }

    async fn execute(&self, job: &Job, task: &Task, written: &mut Vec<DataNodeId>) -> Outcome {
        let mut inputs = Vec::with_capacity(task.input_ids.len());
        for input in &task.input_ids {
            match self.managers.data.read(input).await {
                Ok(value) => inputs.push(value),
                Err(e) => return Outcome::Failed(vec![e.to_string()]),
            }
        }

        let function = match self.functions.resolve(&task.function_name).await {
            Ok(function) => function,
            Err(e) => return Outcome::Failed(vec![e.to_string()]),
        };

        let results = match self.call(function, inputs).await {
            Ok(results) => results,
            Err(stacktrace) => return Outcome::Failed(stacktrace),
        };

        if results.len() != task.output_ids.len() {
            return Outcome::Failed(vec![DataPipeError::TaskExecution(format!(
                "函数 {} 返回了 {} 个结果，任务需要 {} 个输出",
                task.function_name,
                results.len(),
                task.output_ids.len()
            ))
            .to_string()]);
        }

        for (output, value) in task.output_ids.iter().zip(results) {
            if let Err(e) = self
                .managers
                .data
                .write(output, value, EditOptions::by_job(job.id.clone()))
                .await
            {
                return Outcome::Failed(vec![format!("写入输出 {output} 失败"), e.to_string()]);
            }
            written.push(output.clone());
        }
        Outcome::Completed
    }

    async fn call(
        &self,
        function: Arc<dyn TaskFunction>,
        inputs: Vec<Value>,
    ) -> Result<Vec<Value>, Vec<String>> {
        let result = match self.mode {
            ExecutionMode::Inline => catch_unwind(AssertUnwindSafe(|| function.call(inputs)))
                .map_err(|panic| panic_message(panic.as_ref())),
            ExecutionMode::Blocking => tokio::task::spawn_blocking(move || function.call(inputs))
                .await
                .map_err(|e| match e.try_into_panic() {
                    Ok(panic) => panic_message(panic.as_ref()),
                    Err(e) => e.to_string(),
                }),
        };

        match result {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(e)) => Err(e.chain().map(|cause| cause.to_string()).collect()),
            Err(message) => {
                warn!("任务函数发生panic: {}", message);
                Err(vec![format!("panic: {message}")])
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
