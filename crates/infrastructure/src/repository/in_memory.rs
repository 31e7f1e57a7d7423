use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use datapipe_core::{DataPipeError, DataPipeResult, Entity, EntityFilter, Repository};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// 内存仓储
///
/// 实体以序列化后的 JSON 保存，读取时总是返回新的副本，
/// 调用方持有的实体不会被其它写入悄悄修改。
pub struct InMemoryRepository<T: Entity> {
    entities: Arc<RwLock<HashMap<String, Value>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            entities: Arc::new(RwLock::new(HashMap::new())),
            _marker: PhantomData,
        }
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    fn decode(value: &Value) -> DataPipeResult<T> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Clone for InMemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            entities: Arc::clone(&self.entities),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn save(&self, entity: &T) -> DataPipeResult<()> {
        let value = serde_json::to_value(entity)?;
        self.entities.write().await.insert(entity.entity_id(), value);
        Ok(())
    }

    async fn load(&self, id: &str) -> DataPipeResult<T> {
        let entities = self.entities.read().await;
        let value = entities
            .get(id)
            .ok_or_else(|| DataPipeError::not_found(T::ENTITY_NAME, id))?;
        Self::decode(value)
    }

    async fn load_all(&self, filters: &[EntityFilter]) -> DataPipeResult<Vec<T>> {
        let entities = self.entities.read().await;
        entities
            .values()
            .filter(|value| filters.iter().all(|f| f.matches(value)))
            .map(Self::decode)
            .collect()
    }

    async fn delete(&self, id: &str) -> DataPipeResult<()> {
        match self.entities.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(DataPipeError::not_found(T::ENTITY_NAME, id)),
        }
    }

    async fn delete_many(&self, ids: &[String]) -> DataPipeResult<()> {
        let mut entities = self.entities.write().await;
        if let Some(missing) = ids.iter().find(|id| !entities.contains_key(id.as_str())) {
            return Err(DataPipeError::not_found(T::ENTITY_NAME, missing.as_str()));
        }
        for id in ids {
            entities.remove(id);
        }
        Ok(())
    }

    async fn delete_all(&self) -> DataPipeResult<()> {
        let mut entities = self.entities.write().await;
        debug!("清空内存仓储 {}，共 {} 个实体", T::ENTITY_NAME, entities.len());
        entities.clear();
        Ok(())
    }

    async fn search(&self, attribute: &str, value: &Value) -> DataPipeResult<Option<T>> {
        let filter = EntityFilter::new(attribute, value.clone());
        let entities = self.entities.read().await;
        entities
            .values()
            .find(|v| filter.matches(v))
            .map(Self::decode)
            .transpose()
    }

    async fn export(&self, id: &str, folder: &Path) -> DataPipeResult<PathBuf> {
        let value = {
            let entities = self.entities.read().await;
            entities
                .get(id)
                .cloned()
                .ok_or_else(|| DataPipeError::not_found(T::ENTITY_NAME, id))?
        };
        tokio::fs::create_dir_all(folder).await?;
        let path = folder.join(format!("{id}.json"));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&value)?).await?;
        Ok(path)
    }
}
