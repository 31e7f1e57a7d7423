use std::path::{Path, PathBuf};
use std::sync::Arc;

use datapipe_core::{DataPipeError, DataPipeResult, EntityFilter, Repository};
use datapipe_domain::{
    filter_data, Condition, DataNode, DataNodeConfig, DataNodeId, DataStorage, EditOptions,
    InMemoryStore, JoinOperator, Scope,
};
use serde_json::Value;
use tracing::{debug, info};

use super::{EntityManager, Ownership};

/// 数据节点管理器
///
/// 负责数据节点元数据的持久化和实际数据的读写。`in_memory` 类型的数据
/// 保存在管理器自己持有的 [`InMemoryStore`] 中。
pub struct DataManager {
    entities: EntityManager<DataNode>,
    memory: InMemoryStore,
    storage_folder: PathBuf,
    version: String,
}

impl DataManager {
    pub fn new(
        repository: Arc<dyn Repository<DataNode>>,
        storage_folder: impl Into<PathBuf>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            entities: EntityManager::new(repository),
            memory: InMemoryStore::new(),
            storage_folder: storage_folder.into(),
            version: version.into(),
        }
    }

    pub fn storage_folder(&self) -> &Path {
        &self.storage_folder
    }

    /// 按蓝图创建新的数据节点，配置了 `default_data` 时立即写入
    ///
    /// 属性按原样保存，`ENV[VAR]` 只在构建存储和读取时替换。
    pub async fn create(&self, config: &DataNodeConfig, owner_id: Option<String>) -> DataPipeResult<DataNode> {
        let storage_type = config.parsed_storage_type()?;
        let mut dn = DataNode::new(&config.id, config.scope, DataStorage::InMemory)?;
        dn.properties = config.properties.clone();
        let resolved = dn.resolved_properties()?;
        dn.storage = DataStorage::build(storage_type, &dn.id, &resolved, &self.storage_folder);
        dn.name = resolved
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        dn.owner_id = owner_id;
        dn.validity_period = config.validity_period;
        dn.version = self.version.clone();
        self.entities.set(&dn).await?;
        debug!("创建数据节点 {} ({})", dn.id, storage_type);

        if let Some(default_data) = resolved.get("default_data") {
            return self
                .write(&dn.id, default_data.clone(), EditOptions::default().with_message("default data"))
                .await;
        }
        Ok(dn)
    }

    /// 按范围复用已有数据节点，SCENARIO 范围总是新建
    pub async fn get_or_create(&self, config: &DataNodeConfig, ownership: &Ownership) -> DataPipeResult<DataNode> {
        let owner_id = ownership.owner_for(config.scope);
        if config.scope > Scope::Scenario {
            let owner_value = owner_id.clone().map(Value::String).unwrap_or(Value::Null);
            let existing = self
                .entities
                .get_all_by(&[
                    EntityFilter::new("config_id", config.id.as_str()),
                    EntityFilter::new("owner_id", owner_value),
                ])
                .await?;
            if let Some(dn) = existing.into_iter().next() {
                debug!("复用数据节点 {} (范围 {:?})", dn.id, config.scope);
                return Ok(dn);
            }
        }
        self.create(config, owner_id).await
    }

    pub async fn get(&self, id: &DataNodeId) -> DataPipeResult<DataNode> {
        self.entities.get(id.as_str()).await
    }

    pub async fn get_all(&self) -> DataPipeResult<Vec<DataNode>> {
        self.entities.get_all().await
    }

    pub async fn get_by_config_id(&self, config_id: &str) -> DataPipeResult<Vec<DataNode>> {
        self.entities.get_by_config_id(config_id).await
    }

    pub async fn set(&self, dn: &DataNode) -> DataPipeResult<()> {
        self.entities.set(dn).await
    }

    pub async fn update<F>(&self, id: &DataNodeId, apply: F) -> DataPipeResult<DataNode>
    where
        F: FnOnce(&mut DataNode) -> DataPipeResult<()>,
    {
        self.entities.update(id.as_str(), apply).await
    }

    /// 读取数据，从未写入过时返回 [`DataPipeError::NoData`]
    pub async fn read(&self, id: &DataNodeId) -> DataPipeResult<Value> {
        let dn = self.get(id).await?;
        if dn.last_edit_date.is_none() {
            return Err(DataPipeError::NoData { id: id.to_string() });
        }
        dn.storage.read(&dn.id, &self.memory).await
    }

    /// 写入数据并记录一次编辑，写入完成后节点解锁
    pub async fn write(&self, id: &DataNodeId, data: Value, options: EditOptions) -> DataPipeResult<DataNode> {
        let dn = self.get(id).await?;
        dn.storage.write(&dn.id, data, &self.memory).await?;
        self.update(id, |dn| {
            dn.record_edit(options);
            Ok(())
        })
        .await
    }

    pub async fn lock_edit(&self, id: &DataNodeId) -> DataPipeResult<DataNode> {
        self.update(id, |dn| {
            dn.lock_edit();
            Ok(())
        })
        .await
    }

    pub async fn unlock_edit(&self, id: &DataNodeId) -> DataPipeResult<DataNode> {
        self.update(id, |dn| {
            dn.unlock_edit();
            Ok(())
        })
        .await
    }

    pub async fn filter(
        &self,
        id: &DataNodeId,
        conditions: &[Condition],
        join: JoinOperator,
    ) -> DataPipeResult<Value> {
        let data = self.read(id).await?;
        filter_data(&data, conditions, join)
    }

    /// 删除数据节点及其数据
    pub async fn delete(&self, id: &DataNodeId) -> DataPipeResult<()> {
        let dn = self.get(id).await?;
        dn.storage.remove(&dn.id, &self.memory).await?;
        self.entities.delete(id.as_str()).await
    }

    pub async fn delete_many(&self, ids: &[DataNodeId]) -> DataPipeResult<()> {
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }

    pub async fn delete_all(&self) -> DataPipeResult<()> {
        for dn in self.get_all().await? {
            dn.storage.remove(&dn.id, &self.memory).await?;
        }
        self.memory.clear().await;
        self.entities.delete_all().await?;
        info!("已删除全部数据节点");
        Ok(())
    }

    pub async fn export(&self, id: &DataNodeId, folder: &Path) -> DataPipeResult<PathBuf> {
        self.entities.export(id.as_str(), folder).await
    }
}
