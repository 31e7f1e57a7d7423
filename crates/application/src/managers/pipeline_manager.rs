use std::sync::Arc;

use datapipe_core::{DataPipeResult, EntityFilter, Repository};
use datapipe_domain::{Pipeline, PipelineConfig, PipelineId, Task};
use serde_json::Value;
use tracing::debug;

use super::EntityManager;

pub struct PipelineManager {
    entities: EntityManager<Pipeline>,
    version: String,
}

impl PipelineManager {
    pub fn new(repository: Arc<dyn Repository<Pipeline>>, version: impl Into<String>) -> Self {
        Self {
            entities: EntityManager::new(repository),
            version: version.into(),
        }
    }

    /// 管道与其任务共享归属：所有任务都属于同一个归属时按配置复用
    pub async fn get_or_create(
        &self,
        config: &PipelineConfig,
        tasks: &[Task],
        scenario_owner: Option<String>,
    ) -> DataPipeResult<Pipeline> {
        let mut owners = tasks.iter().map(|t| t.owner_id.clone());
        let owner_id = match owners.next() {
            Some(first) if owners.all(|o| o == first) => first,
            Some(_) => scenario_owner,
            None => None,
        };
        let owner_value = owner_id.clone().map(Value::String).unwrap_or(Value::Null);

        let existing = self
            .entities
            .get_all_by(&[
                EntityFilter::new("config_id", config.id.as_str()),
                EntityFilter::new("owner_id", owner_value),
            ])
            .await?;
        if let Some(pipeline) = existing.into_iter().next() {
            debug!("复用管道 {}", pipeline.id);
            return Ok(pipeline);
        }

        let mut pipeline = Pipeline::new(&config.id, tasks.iter().map(|t| t.id.clone()).collect())?;
        pipeline.owner_id = owner_id;
        pipeline.properties = config.properties.clone();
        pipeline.version = self.version.clone();
        self.entities.set(&pipeline).await?;
        debug!("创建管道 {}，包含 {} 个任务", pipeline.id, pipeline.task_ids.len());
        Ok(pipeline)
    }

    pub async fn get(&self, id: &PipelineId) -> DataPipeResult<Pipeline> {
        self.entities.get(id.as_str()).await
    }

    pub async fn get_all(&self) -> DataPipeResult<Vec<Pipeline>> {
        self.entities.get_all().await
    }

    pub async fn get_by_config_id(&self, config_id: &str) -> DataPipeResult<Vec<Pipeline>> {
        self.entities.get_by_config_id(config_id).await
    }

    pub async fn set(&self, pipeline: &Pipeline) -> DataPipeResult<()> {
        self.entities.set(pipeline).await
    }

    pub async fn update<F>(&self, id: &PipelineId, apply: F) -> DataPipeResult<Pipeline>
    where
        F: FnOnce(&mut Pipeline) -> DataPipeResult<()>,
    {
        self.entities.update(id.as_str(), apply).await
    }

    pub async fn delete(&self, id: &PipelineId) -> DataPipeResult<()> {
        self.entities.delete(id.as_str()).await
    }

    pub async fn delete_all(&self) -> DataPipeResult<()> {
        self.entities.delete_all().await
    }
}
