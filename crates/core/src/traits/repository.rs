//! 持久化仓储接口定义
//!
//! 编排核心只通过这里定义的 save/load/search 契约访问持久化层，具体实现
//! （内存、文件系统）位于 infrastructure crate。
//!
//! ## 约定
//!
//! - 单个实体的写入必须是原子的（文件系统实现使用临时文件 + rename）
//! - `load` 找不到实体时返回 [`DataPipeError::ModelNotFound`]
//! - `search` 按序列化后的顶层字段精确匹配，返回第一个匹配的实体

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{DataPipeError, DataPipeResult};

/// 可持久化实体
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 实体类型名，用于错误信息和存储目录
    const ENTITY_NAME: &'static str;

    fn entity_id(&self) -> String;
}

/// 按字段值过滤实体
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFilter {
    pub attribute: String,
    pub value: Value,
}

impl EntityFilter {
    pub fn new(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, serialized: &Value) -> bool {
        serialized.get(&self.attribute) == Some(&self.value)
    }

    /// 所有过滤条件都满足时返回 true，空过滤条件匹配任意实体
    pub fn matches_all<T: Entity>(filters: &[EntityFilter], entity: &T) -> DataPipeResult<bool> {
        if filters.is_empty() {
            return Ok(true);
        }
        let serialized = serde_json::to_value(entity)?;
        Ok(filters.iter().all(|f| f.matches(&serialized)))
    }
}

/// 实体仓储接口
///
/// 实现需要满足 `Send + Sync`，以便在多个 Manager 和工作池之间共享。
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// 保存实体，已存在时覆盖
    async fn save(&self, entity: &T) -> DataPipeResult<()>;

    /// 按ID加载实体
    async fn load(&self, id: &str) -> DataPipeResult<T>;

    /// 加载满足全部过滤条件的实体
    async fn load_all(&self, filters: &[EntityFilter]) -> DataPipeResult<Vec<T>>;

    async fn delete(&self, id: &str) -> DataPipeResult<()>;

    async fn delete_many(&self, ids: &[String]) -> DataPipeResult<()>;

    async fn delete_all(&self) -> DataPipeResult<()>;

    /// 按字段值查找第一个匹配的实体
    async fn search(&self, attribute: &str, value: &Value) -> DataPipeResult<Option<T>>;

    /// 将实体导出为 `<folder>/<id>.json`，返回导出文件路径
    async fn export(&self, id: &str, folder: &Path) -> DataPipeResult<PathBuf>;

    async fn exists(&self, id: &str) -> DataPipeResult<bool> {
        match self.load(id).await {
            Ok(_) => Ok(true),
            Err(DataPipeError::ModelNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
