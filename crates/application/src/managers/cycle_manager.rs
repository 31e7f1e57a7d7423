use std::sync::Arc;

use chrono::{DateTime, Utc};
use datapipe_core::{DataPipeResult, EntityFilter, Repository};
use datapipe_domain::{Cycle, CycleId, Frequency};
use tracing::info;

use super::EntityManager;

pub struct CycleManager {
    entities: EntityManager<Cycle>,
}

impl CycleManager {
    pub fn new(repository: Arc<dyn Repository<Cycle>>) -> Self {
        Self {
            entities: EntityManager::new(repository),
        }
    }

    /// 获取包含 `date` 的周期，不存在时创建
    pub async fn get_or_create(&self, frequency: Frequency, date: DateTime<Utc>) -> DataPipeResult<Cycle> {
        let cycles = self
            .entities
            .get_all_by(&[EntityFilter::new("frequency", frequency.as_str())])
            .await?;
        if let Some(cycle) = cycles.into_iter().find(|c| c.contains(date)) {
            return Ok(cycle);
        }

        let cycle = Cycle::for_date(frequency, date);
        self.entities.set(&cycle).await?;
        info!("创建周期 {} ({} ~ {})", cycle.id, cycle.start_date, cycle.end_date);
        Ok(cycle)
    }

    pub async fn get(&self, id: &CycleId) -> DataPipeResult<Cycle> {
        self.entities.get(id.as_str()).await
    }

    pub async fn get_all(&self) -> DataPipeResult<Vec<Cycle>> {
        self.entities.get_all().await
    }

    pub async fn delete(&self, id: &CycleId) -> DataPipeResult<()> {
        self.entities.delete(id.as_str()).await
    }

    pub async fn delete_all(&self) -> DataPipeResult<()> {
        self.entities.delete_all().await
    }
}
