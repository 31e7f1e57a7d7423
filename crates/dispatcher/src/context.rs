use std::sync::Arc;
use std::time::Duration;

use datapipe_application::{JobListener, Managers};
use datapipe_core::{DataPipeError, DataPipeResult, EntityFilter, FunctionRegistry, JobConfig, JobMode};
use datapipe_domain::{Job, JobId};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::dispatcher::{DevelopmentJobDispatcher, JobDispatcher, StandaloneJobDispatcher};
use crate::metrics::DispatcherMetrics;
use crate::orchestrator::{Orchestrator, Submittable};

/// 提交选项
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// 忽略跳过策略，总是执行
    pub force: bool,
    /// 等待所有 Job 结束后再返回
    pub wait: bool,
    /// 等待的最长时间，`None` 表示一直等待
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn wait(mut self, timeout: Option<Duration>) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }
}

/// 编排上下文
///
/// 持有编排器和当前唯一的调度器。调度器需要显式构建，构建之前提交会返回
/// [`DataPipeError::DispatcherNotBuilt`]。
pub struct OrchestrationContext {
    orchestrator: Arc<Orchestrator>,
    functions: FunctionRegistry,
    job_config: RwLock<JobConfig>,
    dispatcher: RwLock<Option<Arc<dyn JobDispatcher>>>,
}

impl OrchestrationContext {
    pub fn new(managers: Managers, functions: FunctionRegistry, job_config: JobConfig) -> Self {
        let orchestrator = Orchestrator::new(
            managers,
            job_config.failure_policy,
            Duration::from_millis(job_config.poll_interval_ms),
            DispatcherMetrics::new(),
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            functions,
            job_config: RwLock::new(job_config),
            dispatcher: RwLock::new(None),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn managers(&self) -> &Managers {
        self.orchestrator.managers()
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub async fn job_config(&self) -> JobConfig {
        self.job_config.read().await.clone()
    }

    /// 按当前 Job 配置构建调度器
    ///
    /// 工作池模式下已有运行中且大小相同的工作池时直接复用。`force_restart`
    /// 会放弃队列中等待的 Job，丢弃旧的工作池（不等待执行中的 Job）并启动新的。
    pub async fn build_dispatcher(&self, force_restart: bool) -> DataPipeResult<Arc<dyn JobDispatcher>> {
        let config = self.job_config().await;
        let mut slot = self.dispatcher.write().await;

        if let Some(current) = slot.as_ref() {
            let reusable = current.mode() == config.mode
                && current.is_running()
                && (config.mode == JobMode::Development
                    || current.max_workers() == config.max_nb_of_workers);
            if reusable && !force_restart {
                return Ok(Arc::clone(current));
            }
        }

        if let Some(previous) = slot.take() {
            previous.stop(!force_restart).await;
            if force_restart {
                let abandoned = self.orchestrator.abandon_pending().await?;
                if abandoned > 0 {
                    warn!("强制重启调度器，放弃了 {} 个等待中的 Job", abandoned);
                }
            }
        }

        let dispatcher: Arc<dyn JobDispatcher> = match config.mode {
            JobMode::Development => Arc::new(DevelopmentJobDispatcher::new(
                Arc::clone(&self.orchestrator),
                self.functions.clone(),
            )),
            JobMode::Standalone => {
                let pool = StandaloneJobDispatcher::new(
                    Arc::clone(&self.orchestrator),
                    self.functions.clone(),
                    config.max_nb_of_workers,
                    Duration::from_millis(config.poll_interval_ms),
                );
                pool.start().await;
                Arc::new(pool)
            }
        };
        info!("调度器已构建: {:?}", config.mode);
        *slot = Some(Arc::clone(&dispatcher));
        drop(slot);

        // 新调度器接手队列中剩余的 Job
        dispatcher.dispatch().await?;
        Ok(dispatcher)
    }

    /// 切换 Job 配置并重新构建调度器
    pub async fn reconfigure(&self, job_config: JobConfig, force_restart: bool) -> DataPipeResult<Arc<dyn JobDispatcher>> {
        job_config
            .validate()
            .map_err(|e| DataPipeError::Configuration(e.to_string()))?;
        self.orchestrator
            .set_failure_policy(job_config.failure_policy)
            .await;
        *self.job_config.write().await = job_config;
        self.build_dispatcher(force_restart).await
    }

    pub async fn dispatcher(&self) -> DataPipeResult<Arc<dyn JobDispatcher>> {
        self.dispatcher
            .read()
            .await
            .clone()
            .ok_or(DataPipeError::DispatcherNotBuilt)
    }

    /// 提交实体并交给调度器执行
    pub async fn submit(
        &self,
        submittable: &Submittable,
        listeners: &[Arc<dyn JobListener>],
        options: &SubmitOptions,
    ) -> DataPipeResult<Vec<Job>> {
        let dispatcher = self.dispatcher().await?;
        let jobs = self
            .orchestrator
            .submit(submittable, listeners, options.force)
            .await?;
        dispatcher.dispatch().await?;

        if options.wait {
            self.orchestrator
                .wait_for(dispatcher.as_ref(), &jobs, options.timeout)
                .await
        } else {
            self.orchestrator.refresh(&jobs).await
        }
    }

    pub async fn cancel_job(&self, job_id: &JobId) -> DataPipeResult<Job> {
        let job = self.orchestrator.cancel_job(job_id).await?;
        if let Ok(dispatcher) = self.dispatcher().await {
            dispatcher.dispatch().await?;
        }
        Ok(job)
    }

    pub async fn get_jobs(&self, filters: &[EntityFilter]) -> DataPipeResult<Vec<Job>> {
        self.orchestrator.get_jobs(filters).await
    }

    /// 停止并移除当前调度器
    pub async fn stop(&self, wait: bool) {
        if let Some(dispatcher) = self.dispatcher.write().await.take() {
            dispatcher.stop(wait).await;
        }
    }
}
