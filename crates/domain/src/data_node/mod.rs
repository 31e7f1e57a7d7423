//! 数据节点
//!
//! 数据节点只保存元数据（编辑记录、锁标记、有效期），实际数据由
//! [`DataStorage`] 指向的后端保存。

pub mod filter;
pub mod storage;

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use datapipe_core::{DataPipeError, DataPipeResult, Entity, MODEL_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{validate_config_id, DataNodeId, JobId};
use crate::serde_helpers::opt_duration_secs;
use crate::value_objects::Scope;

pub use filter::{filter_data, Condition, JoinOperator, Operator};
pub use storage::{DataStorage, InMemoryStore, StorageType};

/// 一次编辑记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// 写入时附带的编辑信息
#[derive(Debug, Clone, Default)]
pub struct EditOptions {
    pub timestamp: Option<DateTime<Utc>>,
    pub job_id: Option<JobId>,
    pub message: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl EditOptions {
    pub fn by_job(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            ..Default::default()
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataNode {
    pub id: DataNodeId,
    pub config_id: String,
    pub scope: Scope,
    pub storage: DataStorage,
    pub name: Option<String>,
    pub owner_id: Option<String>,
    pub parent_ids: BTreeSet<String>,
    pub last_edit_date: Option<DateTime<Utc>>,
    pub edits: Vec<Edit>,
    pub edit_in_progress: bool,
    #[serde(default, with = "opt_duration_secs")]
    pub validity_period: Option<Duration>,
    pub properties: HashMap<String, Value>,
    pub version: String,
}

impl DataNode {
    pub fn new(config_id: &str, scope: Scope, storage: DataStorage) -> DataPipeResult<Self> {
        validate_config_id(config_id)?;
        Ok(Self {
            id: DataNodeId::generate(config_id),
            config_id: config_id.to_string(),
            scope,
            storage,
            name: None,
            owner_id: None,
            parent_ids: BTreeSet::new(),
            last_edit_date: None,
            edits: Vec::new(),
            edit_in_progress: false,
            validity_period: None,
            properties: HashMap::new(),
            version: MODEL_VERSION.to_string(),
        })
    }

    pub fn with_validity_period(mut self, period: Duration) -> Self {
        self.validity_period = Some(period);
        self
    }

    /// 至少写过一次且没有正在进行的编辑
    pub fn is_ready_for_reading(&self) -> bool {
        self.last_edit_date.is_some() && !self.edit_in_progress
    }

    /// 写过数据且仍在有效期内，不考虑锁状态
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (self.last_edit_date, self.validity_period) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(last), Some(period)) => now - last <= period,
        }
    }

    pub fn is_up_to_date_at(&self, now: DateTime<Utc>) -> bool {
        self.is_ready_for_reading() && self.is_valid_at(now)
    }

    pub fn is_up_to_date(&self) -> bool {
        self.is_up_to_date_at(Utc::now())
    }

    /// 数据过期时间，没有有效期时等于最后编辑时间
    pub fn expiration_date(&self) -> DataPipeResult<DateTime<Utc>> {
        let last = self.last_edit_date.ok_or_else(|| DataPipeError::NoData {
            id: self.id.to_string(),
        })?;
        Ok(match self.validity_period {
            Some(period) => last + period,
            None => last,
        })
    }

    /// 所有由 Job 产生的编辑对应的 Job ID
    pub fn job_ids(&self) -> Vec<JobId> {
        self.edits.iter().filter_map(|e| e.job_id.clone()).collect()
    }

    pub fn last_edit(&self) -> Option<&Edit> {
        self.edits.last()
    }

    pub fn lock_edit(&mut self) {
        self.edit_in_progress = true;
    }

    pub fn unlock_edit(&mut self) {
        self.edit_in_progress = false;
    }

    /// 记录一次成功写入：追加编辑记录、更新最后编辑时间并释放锁
    pub fn record_edit(&mut self, options: EditOptions) {
        let timestamp = options.timestamp.unwrap_or_else(Utc::now);
        self.edits.push(Edit {
            timestamp,
            job_id: options.job_id,
            message: options.message,
            metadata: options.metadata,
        });
        self.last_edit_date = Some(timestamp);
        self.edit_in_progress = false;
    }

    /// 读取属性，`ENV[VAR]` 形式的值在读取时替换为环境变量
    ///
    /// 持久化的始终是原始值。
    pub fn property(&self, key: &str) -> DataPipeResult<Option<Value>> {
        self.properties.get(key).map(resolve_env).transpose()
    }

    /// 全部属性，环境变量已替换
    pub fn resolved_properties(&self) -> DataPipeResult<HashMap<String, Value>> {
        self.properties
            .iter()
            .map(|(key, value)| Ok((key.clone(), resolve_env(value)?)))
            .collect()
    }

    /// 显式配置的 `label` 属性
    pub fn explicit_label(&self) -> DataPipeResult<Option<String>> {
        Ok(self
            .property("label")?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    /// 不带归属实体的标签：显式标签、名称、配置ID依次选用
    pub fn simple_label(&self) -> DataPipeResult<String> {
        Ok(self
            .explicit_label()?
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| self.config_id.clone()))
    }
}

/// `ENV[VAR]` 中的变量名
fn env_reference(raw: &str) -> Option<&str> {
    let name = raw.strip_prefix("ENV[")?.strip_suffix(']')?;
    let mut chars = name.chars();
    let head = chars.next()?;
    let valid = (head.is_ascii_alphabetic() || head == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

/// 把 `ENV[VAR]` 替换为环境变量的值，其他值原样返回
pub fn resolve_env(value: &Value) -> DataPipeResult<Value> {
    let Some(name) = value.as_str().and_then(env_reference) else {
        return Ok(value.clone());
    };
    std::env::var(name)
        .map(Value::String)
        .map_err(|_| DataPipeError::Configuration(format!("环境变量 {name} 未设置")))
}

impl Entity for DataNode {
    const ENTITY_NAME: &'static str = "data_node";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}
