use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use datapipe_core::{DataPipeResult, Entity, MODEL_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{validate_config_id, CycleId, PipelineId, ScenarioId};

/// 场景：一组管道，可选地挂在某个周期上
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: ScenarioId,
    pub config_id: String,
    pub pipeline_ids: Vec<PipelineId>,
    pub cycle_id: Option<CycleId>,
    pub is_primary: bool,
    pub tags: BTreeSet<String>,
    pub creation_date: DateTime<Utc>,
    pub properties: HashMap<String, Value>,
    pub version: String,
}

impl Scenario {
    pub fn new(config_id: &str, pipeline_ids: Vec<PipelineId>) -> DataPipeResult<Self> {
        validate_config_id(config_id)?;
        Ok(Self {
            id: ScenarioId::generate(config_id),
            config_id: config_id.to_string(),
            pipeline_ids,
            cycle_id: None,
            is_primary: false,
            tags: BTreeSet::new(),
            creation_date: Utc::now(),
            properties: HashMap::new(),
            version: MODEL_VERSION.to_string(),
        })
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.remove(tag);
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// `label` 属性、创建时的名称、配置ID依次选用
    pub fn simple_label(&self) -> String {
        ["label", "name"]
            .iter()
            .find_map(|key| self.properties.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| self.config_id.clone())
    }
}

impl Entity for Scenario {
    const ENTITY_NAME: &'static str = "scenario";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        let mut scenario = Scenario::new("monthly_report", Vec::new()).unwrap();
        assert!(!scenario.is_primary);
        scenario.add_tag("draft");
        scenario.add_tag("draft");
        assert!(scenario.has_tag("draft"));
        assert_eq!(scenario.tags.len(), 1);
        scenario.remove_tag("draft");
        assert!(!scenario.has_tag("draft"));
    }

    #[test]
    fn test_simple_label() {
        let mut scenario = Scenario::new("monthly_report", Vec::new()).unwrap();
        assert_eq!(scenario.simple_label(), "monthly_report");
        scenario.properties.insert("name".to_string(), Value::from("三月"));
        assert_eq!(scenario.simple_label(), "三月");
        scenario.properties.insert("label".to_string(), Value::from("报表"));
        assert_eq!(scenario.simple_label(), "报表");
    }
}
