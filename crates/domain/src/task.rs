use std::collections::{BTreeSet, HashMap};

use datapipe_core::{DataPipeResult, Entity, MODEL_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{validate_config_id, DataNodeId, TaskId};

/// 任务：输入数据节点、函数、输出数据节点的绑定
///
/// 函数以注册名引用，执行时从 `FunctionRegistry` 解析。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub config_id: String,
    pub owner_id: Option<String>,
    pub parent_ids: BTreeSet<String>,
    pub function_name: String,
    pub input_ids: Vec<DataNodeId>,
    pub output_ids: Vec<DataNodeId>,
    pub skippable: bool,
    pub properties: HashMap<String, Value>,
    pub version: String,
}

impl Task {
    pub fn new(
        config_id: &str,
        function_name: impl Into<String>,
        input_ids: Vec<DataNodeId>,
        output_ids: Vec<DataNodeId>,
    ) -> DataPipeResult<Self> {
        validate_config_id(config_id)?;
        Ok(Self {
            id: TaskId::generate(config_id),
            config_id: config_id.to_string(),
            owner_id: None,
            parent_ids: BTreeSet::new(),
            function_name: function_name.into(),
            input_ids,
            output_ids,
            skippable: false,
            properties: HashMap::new(),
            version: MODEL_VERSION.to_string(),
        })
    }

    pub fn skippable(mut self, skippable: bool) -> Self {
        self.skippable = skippable;
        self
    }

    /// 输入和输出涉及的全部数据节点
    pub fn data_node_ids(&self) -> impl Iterator<Item = &DataNodeId> {
        self.input_ids.iter().chain(self.output_ids.iter())
    }
}

impl Entity for Task {
    const ENTITY_NAME: &'static str = "task";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}
