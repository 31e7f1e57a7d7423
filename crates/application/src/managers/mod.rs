//! Manager 层：按实体类型提供增删改查

mod cycle_manager;
mod data_manager;
mod entity_manager;
mod job_manager;
mod lineage;
mod ownership;
mod pipeline_manager;
mod scenario_manager;
mod task_manager;

use std::sync::Arc;

use datapipe_core::{CoreConfig, DataPipeResult};
use datapipe_infrastructure::RepositoryFactory;
use tracing::info;

pub use cycle_manager::CycleManager;
pub use data_manager::DataManager;
pub use entity_manager::EntityManager;
pub use job_manager::{JobListener, JobManager, ListenerId};
pub use lineage::DataNodeParents;
pub use ownership::Ownership;
pub use pipeline_manager::PipelineManager;
pub use scenario_manager::ScenarioManager;
pub use task_manager::TaskManager;

/// 全部 Manager 的集合，编排器和调度器通过它访问实体
#[derive(Clone)]
pub struct Managers {
    pub data: Arc<DataManager>,
    pub tasks: Arc<TaskManager>,
    pub pipelines: Arc<PipelineManager>,
    pub cycles: Arc<CycleManager>,
    pub scenarios: Arc<ScenarioManager>,
    pub jobs: Arc<JobManager>,
}

impl Managers {
    /// 按核心配置选择仓储类型并创建全部 Manager
    pub fn from_config(config: &CoreConfig) -> Self {
        let version = config.model_version();
        let storage_path = config.storage_path();

        let data = Arc::new(DataManager::new(
            RepositoryFactory::create(config),
            storage_path,
            version.clone(),
        ));
        let tasks = Arc::new(TaskManager::new(RepositoryFactory::create(config), version.clone()));
        let pipelines = Arc::new(PipelineManager::new(
            RepositoryFactory::create(config),
            version.clone(),
        ));
        let cycles = Arc::new(CycleManager::new(RepositoryFactory::create(config)));
        let scenarios = Arc::new(ScenarioManager::new(
            RepositoryFactory::create(config),
            Arc::clone(&data),
            Arc::clone(&tasks),
            Arc::clone(&pipelines),
            Arc::clone(&cycles),
            version.clone(),
        ));
        let jobs = Arc::new(JobManager::new(RepositoryFactory::create(config), version));

        Self {
            data,
            tasks,
            pipelines,
            cycles,
            scenarios,
            jobs,
        }
    }

    /// 删除所有实体和数据
    pub async fn clean_all_entities(&self) -> DataPipeResult<()> {
        self.jobs.delete_all().await?;
        self.scenarios.delete_all().await?;
        self.cycles.delete_all().await?;
        self.pipelines.delete_all().await?;
        self.tasks.delete_all().await?;
        self.data.delete_all().await?;
        info!("已清理全部实体");
        Ok(())
    }
}
