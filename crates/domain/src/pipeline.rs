use std::collections::{BTreeSet, HashMap};

use datapipe_core::{DataPipeResult, Entity, MODEL_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{validate_config_id, PipelineId, TaskId};

/// 按声明顺序排列的任务集合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub config_id: String,
    pub owner_id: Option<String>,
    pub parent_ids: BTreeSet<String>,
    pub task_ids: Vec<TaskId>,
    pub properties: HashMap<String, Value>,
    pub version: String,
}

impl Pipeline {
    pub fn new(config_id: &str, task_ids: Vec<TaskId>) -> DataPipeResult<Self> {
        validate_config_id(config_id)?;
        Ok(Self {
            id: PipelineId::generate(config_id),
            config_id: config_id.to_string(),
            owner_id: None,
            parent_ids: BTreeSet::new(),
            task_ids,
            properties: HashMap::new(),
            version: MODEL_VERSION.to_string(),
        })
    }
}

impl Entity for Pipeline {
    const ENTITY_NAME: &'static str = "pipeline";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}
