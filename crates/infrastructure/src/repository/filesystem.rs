use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use datapipe_core::{DataPipeError, DataPipeResult, Entity, EntityFilter, Repository};
use serde_json::Value;
use tracing::{debug, warn};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 文件系统仓储
///
/// 每种实体一个目录 `<root>/<entity>s/`，每个实体一个 `<id>.json` 文件。
/// 写入先落到临时文件再 rename，保证单个实体的写入是原子的。
pub struct FileSystemRepository<T: Entity> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> FileSystemRepository<T> {
    pub fn new(root_folder: impl AsRef<Path>) -> Self {
        Self {
            dir: root_folder.as_ref().join(format!("{}s", T::ENTITY_NAME)),
            _marker: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read_value(&self, id: &str) -> DataPipeResult<Value> {
        match tokio::fs::read(self.path_of(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DataPipeError::not_found(T::ENTITY_NAME, id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_all_values(&self) -> DataPipeResult<Vec<Value>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut values = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // 并发删除时文件可能已经不存在
            match tokio::fs::read(&path).await {
                Ok(bytes) => values.push(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(values)
    }

    async fn remove(&self, id: &str) -> DataPipeResult<()> {
        match tokio::fs::remove_file(self.path_of(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DataPipeError::not_found(T::ENTITY_NAME, id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for FileSystemRepository<T> {
    async fn save(&self, entity: &T) -> DataPipeResult<()> {
        let id = entity.entity_id();
        let bytes = serde_json::to_vec_pretty(entity)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let temp = self.dir.join(format!(
            ".{id}.{}.tmp",
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp, self.path_of(&id)).await {
            warn!("保存 {} {} 失败: {}", T::ENTITY_NAME, id, e);
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(DataPipeError::Storage(format!("无法写入 {id}: {e}")));
        }
        debug!("已保存 {} {}", T::ENTITY_NAME, id);
        Ok(())
    }

    async fn load(&self, id: &str) -> DataPipeResult<T> {
        Ok(serde_json::from_value(self.read_value(id).await?)?)
    }

    async fn load_all(&self, filters: &[EntityFilter]) -> DataPipeResult<Vec<T>> {
        self.read_all_values()
            .await?
            .into_iter()
            .filter(|value| filters.iter().all(|f| f.matches(value)))
            .map(|value| Ok(serde_json::from_value(value)?))
            .collect()
    }

    async fn delete(&self, id: &str) -> DataPipeResult<()> {
        self.remove(id).await
    }

    async fn delete_many(&self, ids: &[String]) -> DataPipeResult<()> {
        for id in ids {
            self.remove(id).await?;
        }
        Ok(())
    }

    async fn delete_all(&self) -> DataPipeResult<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn search(&self, attribute: &str, value: &Value) -> DataPipeResult<Option<T>> {
        let filter = EntityFilter::new(attribute, value.clone());
        self.read_all_values()
            .await?
            .into_iter()
            .find(|v| filter.matches(v))
            .map(|v| Ok(serde_json::from_value(v)?))
            .transpose()
    }

    async fn export(&self, id: &str, folder: &Path) -> DataPipeResult<PathBuf> {
        let source = self.path_of(id);
        if !tokio::fs::try_exists(&source).await? {
            return Err(DataPipeError::not_found(T::ENTITY_NAME, id));
        }
        tokio::fs::create_dir_all(folder).await?;
        let target = folder.join(format!("{id}.json"));
        tokio::fs::copy(&source, &target).await?;
        Ok(target)
    }
}
