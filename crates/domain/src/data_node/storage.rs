//! 数据节点存储后端
//!
//! 存储类型是一个封闭的枚举，在创建数据节点时根据配置的 `storage_type` 选定。
//! 所有后端读写的都是 `serde_json::Value`。

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use datapipe_core::{DataPipeError, DataPipeResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::ids::DataNodeId;

/// 支持的存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    InMemory,
    Pickle,
    Json,
    Csv,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::InMemory => "in_memory",
            StorageType::Pickle => "pickle",
            StorageType::Json => "json",
            StorageType::Csv => "csv",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            StorageType::InMemory => "",
            StorageType::Pickle => "p",
            StorageType::Json => "json",
            StorageType::Csv => "csv",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = DataPipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_memory" => Ok(StorageType::InMemory),
            "pickle" => Ok(StorageType::Pickle),
            "json" => Ok(StorageType::Json),
            "csv" => Ok(StorageType::Csv),
            other => Err(DataPipeError::InvalidStorageType {
                storage_type: other.to_string(),
            }),
        }
    }
}

/// 数据节点的具体存储位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storage_type", rename_all = "snake_case")]
pub enum DataStorage {
    InMemory,
    /// 不透明的序列化对象文件
    Pickle { path: PathBuf },
    Json { path: PathBuf },
    Csv {
        path: PathBuf,
        #[serde(default = "default_has_header")]
        has_header: bool,
    },
}

fn default_has_header() -> bool {
    true
}

impl DataStorage {
    /// 根据存储类型和属性构建存储后端
    ///
    /// 属性中的 `path` 或 `default_path` 优先，否则使用
    /// `<storage_folder>/<storage_type>s/<id>.<ext>`。
    pub fn build(
        storage_type: StorageType,
        id: &DataNodeId,
        properties: &HashMap<String, Value>,
        storage_folder: &Path,
    ) -> Self {
        if storage_type == StorageType::InMemory {
            return DataStorage::InMemory;
        }

        let path = properties
            .get("path")
            .or_else(|| properties.get("default_path"))
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                storage_folder
                    .join(format!("{}s", storage_type.as_str()))
                    .join(format!("{}.{}", id, storage_type.extension()))
            });

        match storage_type {
            StorageType::Pickle => DataStorage::Pickle { path },
            StorageType::Json => DataStorage::Json { path },
            StorageType::Csv => DataStorage::Csv {
                path,
                has_header: properties
                    .get("has_header")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            },
            StorageType::InMemory => DataStorage::InMemory,
        }
    }

    pub fn storage_type(&self) -> StorageType {
        match self {
            DataStorage::InMemory => StorageType::InMemory,
            DataStorage::Pickle { .. } => StorageType::Pickle,
            DataStorage::Json { .. } => StorageType::Json,
            DataStorage::Csv { .. } => StorageType::Csv,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            DataStorage::InMemory => None,
            DataStorage::Pickle { path } | DataStorage::Json { path } | DataStorage::Csv { path, .. } => {
                Some(path)
            }
        }
    }

    pub async fn read(&self, id: &DataNodeId, memory: &InMemoryStore) -> DataPipeResult<Value> {
        match self {
            DataStorage::InMemory => memory.get(id).await,
            DataStorage::Pickle { path } | DataStorage::Json { path } => {
                let bytes = read_file(id, path).await?;
                Ok(serde_json::from_slice(&bytes)?)
            }
            DataStorage::Csv { path, has_header } => {
                let bytes = read_file(id, path).await?;
                csv_codec::decode(&bytes, *has_header)
            }
        }
    }

    pub async fn write(&self, id: &DataNodeId, data: Value, memory: &InMemoryStore) -> DataPipeResult<()> {
        let bytes = match self {
            DataStorage::InMemory => {
                memory.insert(id.clone(), data).await;
                return Ok(());
            }
            DataStorage::Pickle { .. } => serde_json::to_vec(&data)?,
            DataStorage::Json { .. } => serde_json::to_vec_pretty(&data)?,
            DataStorage::Csv { has_header, .. } => csv_codec::encode(&data, *has_header)?,
        };
        if let Some(path) = self.path() {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, bytes).await?;
            debug!("数据节点 {} 已写入 {}", id, path.display());
        }
        Ok(())
    }

    /// 删除持久化的数据文件
    pub async fn remove(&self, id: &DataNodeId, memory: &InMemoryStore) -> DataPipeResult<()> {
        match self.path() {
            None => {
                memory.remove(id).await;
                Ok(())
            }
            Some(path) => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }
}

async fn read_file(id: &DataNodeId, path: &Path) -> DataPipeResult<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DataPipeError::NoData {
            id: id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// `in_memory` 存储类型使用的进程内数据表
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    values: Arc<RwLock<HashMap<DataNodeId, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &DataNodeId) -> DataPipeResult<Value> {
        self.values
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DataPipeError::NoData { id: id.to_string() })
    }

    pub async fn insert(&self, id: DataNodeId, value: Value) {
        self.values.write().await.insert(id, value);
    }

    pub async fn remove(&self, id: &DataNodeId) {
        self.values.write().await.remove(id);
    }

    pub async fn clear(&self) {
        self.values.write().await.clear();
    }
}

/// CSV编解码
///
/// 写入时字符串单元格按需加引号；读取时单元格依次尝试解析为布尔值、
/// 整数、浮点数，都失败时保留为字符串。空单元格在带表头的记录中表示
/// 缺少该字段，在无表头的行中读为空值。
mod csv_codec {
    use super::*;

    fn csv_error(e: csv::Error) -> DataPipeError {
        DataPipeError::Serialization(format!("CSV错误: {e}"))
    }

    fn rows_of(data: &Value) -> DataPipeResult<&Vec<Value>> {
        data.as_array()
            .ok_or_else(|| DataPipeError::Serialization("CSV数据必须是记录数组".to_string()))
    }

    pub(super) fn encode(data: &Value, has_header: bool) -> DataPipeResult<Vec<u8>> {
        let rows = rows_of(data)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(!has_header)
            .from_writer(Vec::new());

        if has_header {
            let records = rows
                .iter()
                .map(|row| {
                    row.as_object().ok_or_else(|| {
                        DataPipeError::Serialization("带表头的CSV每一行必须是对象".to_string())
                    })
                })
                .collect::<DataPipeResult<Vec<_>>>()?;
            let mut columns: Vec<&String> = Vec::new();
            for record in &records {
                for key in record.keys() {
                    if !columns.contains(&key) {
                        columns.push(key);
                    }
                }
            }
            writer.write_record(&columns).map_err(csv_error)?;
            for record in records {
                let cells = columns
                    .iter()
                    .map(|column| record.get(*column).map_or(Ok(String::new()), encode_cell))
                    .collect::<DataPipeResult<Vec<_>>>()?;
                writer.write_record(&cells).map_err(csv_error)?;
            }
        } else {
            for row in rows {
                let values = row.as_array().ok_or_else(|| {
                    DataPipeError::Serialization("无表头的CSV每一行必须是数组".to_string())
                })?;
                let cells = values.iter().map(encode_cell).collect::<DataPipeResult<Vec<_>>>()?;
                writer.write_record(&cells).map_err(csv_error)?;
            }
        }

        writer
            .into_inner()
            .map_err(|e| DataPipeError::Serialization(format!("CSV错误: {}", e.error())))
    }

    pub(super) fn decode(bytes: &[u8], has_header: bool) -> DataPipeResult<Value> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(has_header)
            .flexible(true)
            .from_reader(bytes);

        if !has_header {
            let mut rows = Vec::new();
            for record in reader.records() {
                let record = record.map_err(csv_error)?;
                rows.push(Value::Array(record.iter().map(decode_cell).collect()));
            }
            return Ok(Value::Array(rows));
        }

        let header = reader.headers().map_err(csv_error)?.clone();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            let fields = header
                .iter()
                .zip(record.iter())
                .filter(|(_, cell)| !cell.is_empty())
                .map(|(column, cell)| (column.to_string(), decode_cell(cell)))
                .collect::<Map<_, _>>();
            rows.push(Value::Object(fields));
        }
        Ok(Value::Array(rows))
    }

    fn encode_cell(value: &Value) -> DataPipeResult<String> {
        match value {
            Value::Null => Ok(String::new()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) => Ok(s.clone()),
            _ => Err(DataPipeError::Serialization(
                "CSV单元格不支持嵌套的数组或对象".to_string(),
            )),
        }
    }

    fn decode_cell(cell: &str) -> Value {
        let text = cell.trim();
        if text.is_empty() {
            return Value::Null;
        }
        if let Ok(b) = text.parse::<bool>() {
            return Value::Bool(b);
        }
        if let Ok(i) = text.parse::<i64>() {
            return Value::Number(i.into());
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(cell.to_string()))
    }
}
