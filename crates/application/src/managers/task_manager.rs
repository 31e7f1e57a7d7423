use std::sync::Arc;

use datapipe_core::{DataPipeResult, EntityFilter, Repository};
use datapipe_domain::{DataNode, Scope, Task, TaskConfig, TaskId};
use serde_json::Value;
use tracing::debug;

use super::{EntityManager, Ownership};

pub struct TaskManager {
    entities: EntityManager<Task>,
    version: String,
}

impl TaskManager {
    pub fn new(repository: Arc<dyn Repository<Task>>, version: impl Into<String>) -> Self {
        Self {
            entities: EntityManager::new(repository),
            version: version.into(),
        }
    }

    /// 按蓝图获取或创建任务
    ///
    /// 任务的范围取其数据节点中最小的范围；同一归属下同配置的任务会被复用。
    pub async fn get_or_create(
        &self,
        config: &TaskConfig,
        inputs: &[DataNode],
        outputs: &[DataNode],
        ownership: &Ownership,
    ) -> DataPipeResult<Task> {
        let scope = inputs
            .iter()
            .chain(outputs.iter())
            .map(|dn| dn.scope)
            .min()
            .unwrap_or(Scope::Global);
        let owner_id = ownership.owner_for(scope);
        let owner_value = owner_id.clone().map(Value::String).unwrap_or(Value::Null);

        let existing = self
            .entities
            .get_all_by(&[
                EntityFilter::new("config_id", config.id.as_str()),
                EntityFilter::new("owner_id", owner_value),
            ])
            .await?;
        if let Some(task) = existing.into_iter().next() {
            debug!("复用任务 {}", task.id);
            return Ok(task);
        }

        let mut task = Task::new(
            &config.id,
            config.function.clone(),
            inputs.iter().map(|dn| dn.id.clone()).collect(),
            outputs.iter().map(|dn| dn.id.clone()).collect(),
        )?
        .skippable(config.skippable);
        task.owner_id = owner_id;
        task.properties = config.properties.clone();
        task.version = self.version.clone();
        self.entities.set(&task).await?;
        debug!("创建任务 {} (函数 {})", task.id, task.function_name);
        Ok(task)
    }

    pub async fn get(&self, id: &TaskId) -> DataPipeResult<Task> {
        self.entities.get(id.as_str()).await
    }

    pub async fn get_all(&self) -> DataPipeResult<Vec<Task>> {
        self.entities.get_all().await
    }

    pub async fn get_by_config_id(&self, config_id: &str) -> DataPipeResult<Vec<Task>> {
        self.entities.get_by_config_id(config_id).await
    }

    pub async fn set(&self, task: &Task) -> DataPipeResult<()> {
        self.entities.set(task).await
    }

    pub async fn update<F>(&self, id: &TaskId, apply: F) -> DataPipeResult<Task>
    where
        F: FnOnce(&mut Task) -> DataPipeResult<()>,
    {
        self.entities.update(id.as_str(), apply).await
    }

    pub async fn delete(&self, id: &TaskId) -> DataPipeResult<()> {
        self.entities.delete(id.as_str()).await
    }

    pub async fn delete_many(&self, ids: &[TaskId]) -> DataPipeResult<()> {
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        self.entities.delete_many(&ids).await
    }

    pub async fn delete_all(&self) -> DataPipeResult<()> {
        self.entities.delete_all().await
    }
}
