use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use datapipe_core::{DataPipeError, DataPipeResult, EntityFilter, Repository};
use datapipe_domain::{
    Blueprints, CycleId, DataNode, Pipeline, Scenario, ScenarioId, Task,
};
use serde_json::Value;
use tracing::info;

use super::{CycleManager, DataManager, EntityManager, Ownership, PipelineManager, TaskManager};

/// 场景管理器
///
/// 创建场景时按蓝图实例化整张实体图：数据节点、任务、管道，并处理周期和主场景。
pub struct ScenarioManager {
    entities: EntityManager<Scenario>,
    data: Arc<DataManager>,
    tasks: Arc<TaskManager>,
    pipelines: Arc<PipelineManager>,
    cycles: Arc<CycleManager>,
    version: String,
}

impl ScenarioManager {
    pub fn new(
        repository: Arc<dyn Repository<Scenario>>,
        data: Arc<DataManager>,
        tasks: Arc<TaskManager>,
        pipelines: Arc<PipelineManager>,
        cycles: Arc<CycleManager>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            entities: EntityManager::new(repository),
            data,
            tasks,
            pipelines,
            cycles,
            version: version.into(),
        }
    }

    pub async fn create(
        &self,
        blueprints: &Blueprints,
        config_id: &str,
        creation_date: DateTime<Utc>,
        name: Option<String>,
    ) -> DataPipeResult<Scenario> {
        blueprints.check()?;
        let config = blueprints.scenario(config_id)?;

        let cycle = match config.frequency {
            Some(frequency) => Some(self.cycles.get_or_create(frequency, creation_date).await?),
            None => None,
        };

        let mut scenario = Scenario::new(&config.id, Vec::new())?;
        scenario.creation_date = creation_date;
        scenario.cycle_id = cycle.as_ref().map(|c| c.id.clone());
        scenario.properties = config.properties.clone();
        scenario.version = self.version.clone();
        if let Some(name) = name {
            scenario.properties.insert("name".to_string(), Value::String(name));
        }

        let ownership = Ownership::new(Some(scenario.id.clone()), scenario.cycle_id.clone());
        let mut data_nodes: HashMap<String, DataNode> = HashMap::new();
        let mut tasks: HashMap<String, Task> = HashMap::new();

        for pipeline_config_id in &config.pipelines {
            let pipeline_config = blueprints.pipeline(pipeline_config_id)?;
            let mut pipeline_tasks = Vec::with_capacity(pipeline_config.tasks.len());

            for task_config_id in &pipeline_config.tasks {
                if let Some(task) = tasks.get(task_config_id) {
                    pipeline_tasks.push(task.clone());
                    continue;
                }
                let task_config = blueprints.task(task_config_id)?;
                let mut inputs = Vec::with_capacity(task_config.inputs.len());
                for dn_config_id in &task_config.inputs {
                    inputs.push(self.data_node(blueprints, dn_config_id, &ownership, &mut data_nodes).await?);
                }
                let mut outputs = Vec::with_capacity(task_config.outputs.len());
                for dn_config_id in &task_config.outputs {
                    outputs.push(self.data_node(blueprints, dn_config_id, &ownership, &mut data_nodes).await?);
                }

                let task = self
                    .tasks
                    .get_or_create(task_config, &inputs, &outputs, &ownership)
                    .await?;
                for dn in inputs.iter().chain(outputs.iter()) {
                    let task_id = task.id.to_string();
                    self.data
                        .update(&dn.id, move |dn| {
                            dn.parent_ids.insert(task_id);
                            Ok(())
                        })
                        .await?;
                }
                tasks.insert(task_config_id.clone(), task.clone());
                pipeline_tasks.push(task);
            }

            let pipeline = self
                .pipelines
                .get_or_create(pipeline_config, &pipeline_tasks, Some(scenario.id.to_string()))
                .await?;
            for task in &pipeline_tasks {
                let pipeline_id = pipeline.id.to_string();
                self.tasks
                    .update(&task.id, move |task| {
                        task.parent_ids.insert(pipeline_id);
                        Ok(())
                    })
                    .await?;
            }
            let scenario_id = scenario.id.to_string();
            self.pipelines
                .update(&pipeline.id, move |pipeline| {
                    pipeline.parent_ids.insert(scenario_id);
                    Ok(())
                })
                .await?;
            scenario.pipeline_ids.push(pipeline.id);
        }

        if let Some(cycle_id) = &scenario.cycle_id {
            scenario.is_primary = self.get_primary(cycle_id).await?.is_none();
        }
        self.entities.set(&scenario).await?;
        info!(
            "创建场景 {}，包含 {} 个管道{}",
            scenario.id,
            scenario.pipeline_ids.len(),
            if scenario.is_primary { "（主场景）" } else { "" }
        );
        Ok(scenario)
    }

    async fn data_node(
        &self,
        blueprints: &Blueprints,
        config_id: &str,
        ownership: &Ownership,
        created: &mut HashMap<String, DataNode>,
    ) -> DataPipeResult<DataNode> {
        if let Some(dn) = created.get(config_id) {
            return Ok(dn.clone());
        }
        let config = blueprints.data_node(config_id)?;
        let dn = self.data.get_or_create(config, ownership).await?;
        created.insert(config_id.to_string(), dn.clone());
        Ok(dn)
    }

    pub async fn get(&self, id: &ScenarioId) -> DataPipeResult<Scenario> {
        self.entities.get(id.as_str()).await
    }

    pub async fn get_all(&self) -> DataPipeResult<Vec<Scenario>> {
        self.entities.get_all().await
    }

    pub async fn get_by_config_id(&self, config_id: &str) -> DataPipeResult<Vec<Scenario>> {
        self.entities.get_by_config_id(config_id).await
    }

    pub async fn get_all_by_cycle(&self, cycle_id: &CycleId) -> DataPipeResult<Vec<Scenario>> {
        self.entities
            .get_all_by(&[EntityFilter::new("cycle_id", cycle_id.as_str())])
            .await
    }

    pub async fn get_primary(&self, cycle_id: &CycleId) -> DataPipeResult<Option<Scenario>> {
        Ok(self
            .get_all_by_cycle(cycle_id)
            .await?
            .into_iter()
            .find(|s| s.is_primary))
    }

    pub async fn get_primary_scenarios(&self) -> DataPipeResult<Vec<Scenario>> {
        self.entities
            .get_all_by(&[EntityFilter::new("is_primary", true)])
            .await
    }

    /// 将场景设为其周期的主场景，原主场景取消标记
    pub async fn set_primary(&self, id: &ScenarioId) -> DataPipeResult<Scenario> {
        let scenario = self.get(id).await?;
        let cycle_id = scenario.cycle_id.clone().ok_or_else(|| {
            DataPipeError::Configuration(format!("场景 {id} 不属于任何周期，不能设为主场景"))
        })?;
        if let Some(current) = self.get_primary(&cycle_id).await? {
            if current.id == scenario.id {
                return Ok(current);
            }
            self.entities
                .update(current.id.as_str(), |s| {
                    s.is_primary = false;
                    Ok(())
                })
                .await?;
        }
        self.entities
            .update(id.as_str(), |s| {
                s.is_primary = true;
                Ok(())
            })
            .await
    }

    pub async fn add_tag(&self, id: &ScenarioId, tag: &str) -> DataPipeResult<Scenario> {
        self.entities
            .update(id.as_str(), |s| {
                s.add_tag(tag);
                Ok(())
            })
            .await
    }

    pub async fn remove_tag(&self, id: &ScenarioId, tag: &str) -> DataPipeResult<Scenario> {
        self.entities
            .update(id.as_str(), |s| {
                s.remove_tag(tag);
                Ok(())
            })
            .await
    }

    pub async fn get_by_tag(&self, tag: &str) -> DataPipeResult<Vec<Scenario>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|s| s.has_tag(tag))
            .collect())
    }

    /// 场景中的管道，按声明顺序
    pub async fn pipelines_of(&self, scenario: &Scenario) -> DataPipeResult<Vec<Pipeline>> {
        let mut pipelines = Vec::with_capacity(scenario.pipeline_ids.len());
        for id in &scenario.pipeline_ids {
            pipelines.push(self.pipelines.get(id).await?);
        }
        Ok(pipelines)
    }

    /// 删除场景以及只属于它的管道、任务和数据节点
    pub async fn delete(&self, id: &ScenarioId) -> DataPipeResult<()> {
        let scenario = self.get(id).await?;
        let owner = id.to_string();

        for pipeline_id in &scenario.pipeline_ids {
            let pipeline = self.pipelines.get(pipeline_id).await?;
            if pipeline.owner_id.as_deref() != Some(owner.as_str()) {
                continue;
            }
            for task_id in &pipeline.task_ids {
                let task = match self.tasks.get(task_id).await {
                    Ok(task) => task,
                    Err(DataPipeError::ModelNotFound { .. }) => continue,
                    Err(e) => return Err(e),
                };
                if task.owner_id.as_deref() != Some(owner.as_str()) {
                    continue;
                }
                for dn_id in task.data_node_ids() {
                    match self.data.get(dn_id).await {
                        Ok(dn) if dn.owner_id.as_deref() == Some(owner.as_str()) => {
                            self.data.delete(dn_id).await?;
                        }
                        Ok(_) | Err(DataPipeError::ModelNotFound { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                self.tasks.delete(task_id).await?;
            }
            self.pipelines.delete(pipeline_id).await?;
        }

        self.entities.delete(id.as_str()).await?;
        info!("已删除场景 {}", id);
        Ok(())
    }

    pub async fn delete_all(&self) -> DataPipeResult<()> {
        self.entities.delete_all().await
    }
}
