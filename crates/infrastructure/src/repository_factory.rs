use std::sync::Arc;

use datapipe_core::{CoreConfig, Entity, Repository, RepositoryType};
use tracing::debug;

use crate::repository::{FileSystemRepository, InMemoryRepository};

/// 按配置创建仓储
pub struct RepositoryFactory;

impl RepositoryFactory {
    pub fn create<T: Entity>(config: &CoreConfig) -> Arc<dyn Repository<T>> {
        debug!(
            "创建 {} 仓储，类型: {:?}",
            T::ENTITY_NAME,
            config.repository_type
        );
        match config.repository_type {
            RepositoryType::Filesystem => {
                Arc::new(FileSystemRepository::<T>::new(config.storage_path()))
            }
            RepositoryType::InMemory => Arc::new(InMemoryRepository::<T>::new()),
        }
    }
}
