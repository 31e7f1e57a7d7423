//! 通用实体管理器
//!
//! 调用方拿到的永远是实体副本；修改通过 [`EntityManager::update`] 完成，
//! 同一个ID上的 update/set/delete 按到达顺序串行执行。

use std::collections::HashMap;
use std::sync::Arc;

use datapipe_core::{DataPipeResult, Entity, EntityFilter, Repository};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

pub struct EntityManager<T: Entity> {
    repository: Arc<dyn Repository<T>>,
    id_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T: Entity> EntityManager<T> {
    pub fn new(repository: Arc<dyn Repository<T>>) -> Self {
        Self {
            repository,
            id_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.id_locks.lock().await;
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    pub async fn get(&self, id: &str) -> DataPipeResult<T> {
        self.repository.load(id).await
    }

    pub async fn get_all(&self) -> DataPipeResult<Vec<T>> {
        self.repository.load_all(&[]).await
    }

    pub async fn get_all_by(&self, filters: &[EntityFilter]) -> DataPipeResult<Vec<T>> {
        self.repository.load_all(filters).await
    }

    pub async fn get_by_config_id(&self, config_id: &str) -> DataPipeResult<Vec<T>> {
        self.repository
            .load_all(&[EntityFilter::new("config_id", config_id)])
            .await
    }

    pub async fn search(&self, attribute: &str, value: &Value) -> DataPipeResult<Option<T>> {
        self.repository.search(attribute, value).await
    }

    pub async fn exists(&self, id: &str) -> DataPipeResult<bool> {
        self.repository.exists(id).await
    }

    pub async fn set(&self, entity: &T) -> DataPipeResult<()> {
        let id = entity.entity_id();
        let lock = self.lock_for(&id).await;
        let _guard = lock.lock().await;
        self.repository.save(entity).await
    }

    /// 加载、修改并保存实体；闭包返回错误时不保存
    pub async fn update<F>(&self, id: &str, apply: F) -> DataPipeResult<T>
    where
        F: FnOnce(&mut T) -> DataPipeResult<()>,
    {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        let mut entity = self.repository.load(id).await?;
        apply(&mut entity)?;
        self.repository.save(&entity).await?;
        Ok(entity)
    }

    pub async fn delete(&self, id: &str) -> DataPipeResult<()> {
        let lock = self.lock_for(id).await;
        {
            let _guard = lock.lock().await;
            self.repository.delete(id).await?;
        }
        self.id_locks.lock().await.remove(id);
        debug!("已删除 {} {}", T::ENTITY_NAME, id);
        Ok(())
    }

    pub async fn delete_many(&self, ids: &[String]) -> DataPipeResult<()> {
        self.repository.delete_many(ids).await?;
        let mut locks = self.id_locks.lock().await;
        for id in ids {
            locks.remove(id);
        }
        Ok(())
    }

    pub async fn delete_all(&self) -> DataPipeResult<()> {
        self.repository.delete_all().await?;
        self.id_locks.lock().await.clear();
        Ok(())
    }

    pub async fn export(&self, id: &str, folder: &std::path::Path) -> DataPipeResult<std::path::PathBuf> {
        self.repository.export(id, folder).await
    }
}
