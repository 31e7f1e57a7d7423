//! 数据管道编排框架
//!
//! [`DataPipe`] 把配置、实体蓝图和任务函数组合在一起，对外提供创建场景、
//! 提交执行、查询和取消 Job 的入口。各层的类型通过子 crate 重新导出。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

pub use datapipe_application::{DataNodeParents, JobListener, ListenerId, Managers};
pub use datapipe_core::{
    AppConfig, CoreConfig, DataPipeError, DataPipeResult, EntityFilter, FailurePolicy,
    FunctionRegistry, JobConfig, JobMode,
};
pub use datapipe_dispatcher::{JobDispatcher, OrchestrationContext, SubmitOptions, Submittable};
pub use datapipe_domain::{
    Blueprints, DataNode, DataNodeConfig, DataNodeId, EditOptions, Job, JobId, JobStatus,
    PipelineConfig, Scenario, ScenarioConfig, TaskConfig,
};

pub struct DataPipe {
    config: AppConfig,
    blueprints: Blueprints,
    context: OrchestrationContext,
}

impl DataPipe {
    /// 校验配置和蓝图并构建调度器
    ///
    /// 蓝图中引用的每个函数都必须已经注册。`core.clean_entities` 为 true 时
    /// 会先删除已持久化的全部实体。
    pub async fn new(
        config: AppConfig,
        blueprints: Blueprints,
        functions: FunctionRegistry,
    ) -> DataPipeResult<Self> {
        config
            .validate()
            .map_err(|e| DataPipeError::Configuration(e.to_string()))?;
        blueprints.check()?;
        for task in &blueprints.tasks {
            if !functions.contains(&task.function).await {
                return Err(DataPipeError::FunctionNotFound {
                    name: task.function.clone(),
                });
            }
        }

        let managers = Managers::from_config(&config.core);
        if config.core.clean_entities {
            managers.clean_all_entities().await?;
        }

        let context = OrchestrationContext::new(managers, functions, config.job.clone());
        context.build_dispatcher(false).await?;
        info!(
            "DataPipe 已启动: 调度模式 {:?}, 存储目录 {}",
            config.job.mode,
            config.core.storage_path().display()
        );

        Ok(Self {
            config,
            blueprints,
            context,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn blueprints(&self) -> &Blueprints {
        &self.blueprints
    }

    pub fn managers(&self) -> &Managers {
        self.context.managers()
    }

    pub fn context(&self) -> &OrchestrationContext {
        &self.context
    }

    /// 重新构建调度器，`force_restart` 会放弃队列中等待的 Job
    pub async fn build_dispatcher(&self, force_restart: bool) -> DataPipeResult<Arc<dyn JobDispatcher>> {
        self.context.build_dispatcher(force_restart).await
    }

    /// 按蓝图创建场景，未指定日期时使用当前时间
    pub async fn create_scenario(
        &self,
        config_id: &str,
        creation_date: Option<DateTime<Utc>>,
        name: Option<String>,
    ) -> DataPipeResult<Scenario> {
        self.managers()
            .scenarios
            .create(
                &self.blueprints,
                config_id,
                creation_date.unwrap_or_else(Utc::now),
                name,
            )
            .await
    }

    pub async fn submit(
        &self,
        target: impl Into<Submittable>,
        options: SubmitOptions,
    ) -> DataPipeResult<Vec<Job>> {
        self.submit_with_listeners(target, &[], options).await
    }

    /// 提交并为本次提交的 Job 附加监听器
    pub async fn submit_with_listeners(
        &self,
        target: impl Into<Submittable>,
        listeners: &[Arc<dyn JobListener>],
        options: SubmitOptions,
    ) -> DataPipeResult<Vec<Job>> {
        self.context.submit(&target.into(), listeners, &options).await
    }

    pub async fn get_jobs(&self, filters: &[EntityFilter]) -> DataPipeResult<Vec<Job>> {
        self.context.get_jobs(filters).await
    }

    pub async fn get_job(&self, job_id: &JobId) -> DataPipeResult<Job> {
        self.managers().jobs.get(job_id).await
    }

    pub async fn cancel_job(&self, job_id: &JobId) -> DataPipeResult<Job> {
        self.context.cancel_job(job_id).await
    }

    pub async fn register_listener(&self, listener: Arc<dyn JobListener>) -> ListenerId {
        self.managers().jobs.register_listener(listener).await
    }

    pub async fn unregister_listener(&self, id: ListenerId) -> bool {
        self.managers().jobs.unregister_listener(id).await
    }

    pub async fn read(&self, data_node_id: &DataNodeId) -> DataPipeResult<Value> {
        self.managers().data.read(data_node_id).await
    }

    /// 手动写入数据节点
    pub async fn write(&self, data_node_id: &DataNodeId, data: Value) -> DataPipeResult<DataNode> {
        self.managers()
            .data
            .write(data_node_id, data, EditOptions::default())
            .await
    }

    /// 场景中按配置ID查找数据节点
    pub async fn data_node(&self, scenario: &Scenario, config_id: &str) -> DataPipeResult<DataNode> {
        let mut owned = Vec::new();
        for pipeline in self.managers().scenarios.pipelines_of(scenario).await? {
            for task_id in &pipeline.task_ids {
                let task = self.managers().tasks.get(task_id).await?;
                owned.extend(task.input_ids.into_iter().chain(task.output_ids));
            }
        }
        for id in owned {
            let dn = self.managers().data.get(&id).await?;
            if dn.config_id == config_id {
                return Ok(dn);
            }
        }
        Err(DataPipeError::not_found("DataNode", config_id))
    }

    /// 数据节点的完整标签，例如 `第一季度 > report`
    pub async fn label(&self, data_node: &DataNode) -> DataPipeResult<String> {
        self.managers().data_node_label(data_node).await
    }

    pub async fn parents(&self, data_node: &DataNode) -> DataPipeResult<DataNodeParents> {
        self.managers().data_node_parents(data_node).await
    }

    pub async fn clean_all_entities(&self) -> DataPipeResult<()> {
        self.managers().clean_all_entities().await
    }

    /// 停止调度器，`wait` 为 true 时等待执行中的 Job 结束
    pub async fn shutdown(&self, wait: bool) {
        self.context.stop(wait).await;
        info!("DataPipe 已停止");
    }
}
