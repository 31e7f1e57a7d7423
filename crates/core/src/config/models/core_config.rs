use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 持久化仓储类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryType {
    #[default]
    Filesystem,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub root_folder: String,
    pub storage_folder: String,
    pub repository_type: RepositoryType,
    /// 为空时使用 crate 版本号
    pub version_number: String,
    pub clean_entities: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            root_folder: "./datapipe/".to_string(),
            storage_folder: ".data/".to_string(),
            repository_type: RepositoryType::Filesystem,
            version_number: String::new(),
            clean_entities: false,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage_folder.trim().is_empty() {
            return Err(anyhow::anyhow!("存储目录不能为空"));
        }
        if self.root_folder.trim().is_empty() {
            return Err(anyhow::anyhow!("根目录不能为空"));
        }
        Ok(())
    }

    /// 实体和数据文件的实际存放目录，相对的 `storage_folder` 位于 `root_folder` 之下
    pub fn storage_path(&self) -> PathBuf {
        let storage = PathBuf::from(&self.storage_folder);
        if storage.is_absolute() {
            storage
        } else {
            PathBuf::from(&self.root_folder).join(storage)
        }
    }

    /// 持久化模型上标记的版本号
    pub fn model_version(&self) -> String {
        if self.version_number.is_empty() {
            crate::MODEL_VERSION.to_string()
        } else {
            self.version_number.clone()
        }
    }
}
