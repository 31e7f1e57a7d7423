//! 实体蓝图
//!
//! 蓝图是声明式的配置：可以在代码中构建，也可以从 TOML 解析。
//! 编排核心只读取蓝图，从不修改。
//!
//! ```toml
//! [[data_nodes]]
//! id = "sales"
//! storage_type = "csv"
//!
//! [[tasks]]
//! id = "aggregate"
//! function = "aggregate_sales"
//! inputs = ["sales"]
//! outputs = ["report"]
//! skippable = true
//! ```

use std::collections::{HashMap, HashSet};

use chrono::Duration;
use datapipe_core::{DataPipeError, DataPipeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::data_node::StorageType;
use crate::graph::TaskGraph;
use crate::ids::validate_config_id;
use crate::serde_helpers::opt_duration_secs;
use crate::value_objects::{Frequency, Scope};

fn default_storage_type() -> String {
    StorageType::Pickle.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNodeConfig {
    pub id: String,
    #[serde(default = "default_storage_type")]
    pub storage_type: String,
    #[serde(default)]
    pub scope: Scope,
    /// 有效期（秒）
    #[serde(default, with = "opt_duration_secs")]
    pub validity_period: Option<Duration>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl DataNodeConfig {
    pub fn new(id: impl Into<String>, storage_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            storage_type: storage_type.into(),
            scope: Scope::default(),
            validity_period: None,
            properties: HashMap::new(),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn validity_period(mut self, period: Duration) -> Self {
        self.validity_period = Some(period);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn parsed_storage_type(&self) -> DataPipeResult<StorageType> {
        self.storage_type.parse()
    }

    /// 创建时写入的默认数据
    pub fn default_data(&self) -> Option<&Value> {
        self.properties.get("default_data")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    /// `FunctionRegistry` 中的函数名
    pub function: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub skippable: bool,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl TaskConfig {
    pub fn new(
        id: impl Into<String>,
        function: impl Into<String>,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            function: function.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            skippable: false,
            properties: HashMap::new(),
        }
    }

    pub fn skippable(mut self, skippable: bool) -> Self {
        self.skippable = skippable;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub id: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl PipelineConfig {
    pub fn new(id: impl Into<String>, tasks: &[&str]) -> Self {
        Self {
            id: id.into(),
            tasks: tasks.iter().map(|s| s.to_string()).collect(),
            properties: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub id: String,
    #[serde(default)]
    pub pipelines: Vec<String>,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl ScenarioConfig {
    pub fn new(id: impl Into<String>, pipelines: &[&str]) -> Self {
        Self {
            id: id.into(),
            pipelines: pipelines.iter().map(|s| s.to_string()).collect(),
            frequency: None,
            properties: HashMap::new(),
        }
    }

    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }
}

/// 全部蓝图
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Blueprints {
    pub data_nodes: Vec<DataNodeConfig>,
    pub tasks: Vec<TaskConfig>,
    pub pipelines: Vec<PipelineConfig>,
    pub scenarios: Vec<ScenarioConfig>,
}

impl Blueprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> DataPipeResult<Self> {
        toml::from_str(content)
            .map_err(|e| DataPipeError::Configuration(format!("解析蓝图失败: {e}")))
    }

    pub fn configure_data_node(&mut self, config: DataNodeConfig) -> &mut Self {
        self.data_nodes.retain(|c| c.id != config.id);
        self.data_nodes.push(config);
        self
    }

    pub fn configure_task(&mut self, config: TaskConfig) -> &mut Self {
        self.tasks.retain(|c| c.id != config.id);
        self.tasks.push(config);
        self
    }

    pub fn configure_pipeline(&mut self, config: PipelineConfig) -> &mut Self {
        self.pipelines.retain(|c| c.id != config.id);
        self.pipelines.push(config);
        self
    }

    pub fn configure_scenario(&mut self, config: ScenarioConfig) -> &mut Self {
        self.scenarios.retain(|c| c.id != config.id);
        self.scenarios.push(config);
        self
    }

    pub fn data_node(&self, id: &str) -> DataPipeResult<&DataNodeConfig> {
        self.data_nodes
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| DataPipeError::not_found("DataNodeConfig", id))
    }

    pub fn task(&self, id: &str) -> DataPipeResult<&TaskConfig> {
        self.tasks
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| DataPipeError::not_found("TaskConfig", id))
    }

    pub fn pipeline(&self, id: &str) -> DataPipeResult<&PipelineConfig> {
        self.pipelines
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| DataPipeError::not_found("PipelineConfig", id))
    }

    pub fn scenario(&self, id: &str) -> DataPipeResult<&ScenarioConfig> {
        self.scenarios
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| DataPipeError::not_found("ScenarioConfig", id))
    }

    /// 校验蓝图：ID合法且唯一、存储类型有效、引用存在、任务图无环
    pub fn check(&self) -> DataPipeResult<()> {
        check_ids(self.data_nodes.iter().map(|c| c.id.as_str()))?;
        check_ids(self.tasks.iter().map(|c| c.id.as_str()))?;
        check_ids(self.pipelines.iter().map(|c| c.id.as_str()))?;
        check_ids(self.scenarios.iter().map(|c| c.id.as_str()))?;

        for dn in &self.data_nodes {
            dn.parsed_storage_type()?;
        }

        let data_node_ids: HashSet<&str> = self.data_nodes.iter().map(|c| c.id.as_str()).collect();
        for task in &self.tasks {
            if task.function.is_empty() {
                return Err(DataPipeError::Configuration(format!(
                    "任务 {} 没有配置函数",
                    task.id
                )));
            }
            for dn in task.inputs.iter().chain(task.outputs.iter()) {
                if !data_node_ids.contains(dn.as_str()) {
                    return Err(missing(&task.id, dn));
                }
            }
        }

        for pipeline in &self.pipelines {
            let tasks = pipeline
                .tasks
                .iter()
                .map(|id| self.task(id).map_err(|_| missing(&pipeline.id, id)))
                .collect::<DataPipeResult<Vec<_>>>()?;
            TaskGraph::build(
                tasks
                    .iter()
                    .map(|t| (t.id.clone(), t.inputs.clone(), t.outputs.clone())),
            )
            .topological_order()?;
        }

        for scenario in &self.scenarios {
            for pipeline in &scenario.pipelines {
                if self.pipeline(pipeline).is_err() {
                    return Err(missing(&scenario.id, pipeline));
                }
            }
        }

        debug!(
            "蓝图校验通过: {} 个数据节点, {} 个任务, {} 个管道, {} 个场景",
            self.data_nodes.len(),
            self.tasks.len(),
            self.pipelines.len(),
            self.scenarios.len()
        );
        Ok(())
    }
}

fn check_ids<'a>(ids: impl Iterator<Item = &'a str>) -> DataPipeResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        validate_config_id(id)?;
        if !seen.insert(id) {
            return Err(DataPipeError::Configuration(format!("重复的配置ID: {id}")));
        }
    }
    Ok(())
}

fn missing(owner: &str, missing: &str) -> DataPipeError {
    DataPipeError::MissingDependency {
        owner: owner.to_string(),
        missing: missing.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLUEPRINTS: &str = r#"
        [[data_nodes]]
        id = "a"
        [data_nodes.properties]
        default_data = "A"

        [[data_nodes]]
        id = "b"
        storage_type = "in_memory"
        scope = "GLOBAL"
        validity_period = 3600

        [[tasks]]
        id = "task_a_b"
        function = "a_to_b"
        inputs = ["a"]
        outputs = ["b"]
        skippable = true

        [[pipelines]]
        id = "pipeline_b"
        tasks = ["task_a_b"]

        [[scenarios]]
        id = "scenario"
        pipelines = ["pipeline_b"]
        frequency = "WEEKLY"
    "#;

    #[test]
    fn test_parse_toml_blueprints() {
        let blueprints = Blueprints::from_toml_str(BLUEPRINTS).unwrap();
        blueprints.check().unwrap();

        let a = blueprints.data_node("a").unwrap();
        assert_eq!(a.storage_type, "pickle");
        assert_eq!(a.scope, Scope::Scenario);
        assert_eq!(a.default_data(), Some(&Value::from("A")));

        let b = blueprints.data_node("b").unwrap();
        assert_eq!(b.scope, Scope::Global);
        assert_eq!(b.validity_period, Some(Duration::hours(1)));

        assert!(blueprints.task("task_a_b").unwrap().skippable);
        assert_eq!(
            blueprints.scenario("scenario").unwrap().frequency,
            Some(Frequency::Weekly)
        );
    }

    #[test]
    fn test_check_rejects_invalid_storage_type() {
        let mut blueprints = Blueprints::new();
        blueprints.configure_data_node(DataNodeConfig::new("a", "sql"));
        assert!(matches!(
            blueprints.check(),
            Err(DataPipeError::InvalidStorageType { .. })
        ));
    }

    #[test]
    fn test_check_rejects_missing_reference() {
        let mut blueprints = Blueprints::new();
        blueprints
            .configure_data_node(DataNodeConfig::new("a", "pickle"))
            .configure_task(TaskConfig::new("t", "f", &["a"], &["nope"]));
        match blueprints.check() {
            Err(DataPipeError::MissingDependency { owner, missing }) => {
                assert_eq!(owner, "t");
                assert_eq!(missing, "nope");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_check_rejects_cyclic_pipeline() {
        let mut blueprints = Blueprints::new();
        blueprints
            .configure_data_node(DataNodeConfig::new("a", "pickle"))
            .configure_data_node(DataNodeConfig::new("b", "pickle"))
            .configure_task(TaskConfig::new("a_to_b", "f", &["a"], &["b"]))
            .configure_task(TaskConfig::new("b_to_a", "f", &["b"], &["a"]))
            .configure_pipeline(PipelineConfig::new("loop", &["a_to_b", "b_to_a"]));
        assert!(matches!(
            blueprints.check(),
            Err(DataPipeError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_check_rejects_invalid_config_id() {
        let mut blueprints = Blueprints::new();
        blueprints.configure_data_node(DataNodeConfig::new("not valid", "pickle"));
        assert!(matches!(blueprints.check(), Err(DataPipeError::InvalidConfigId(_))));
    }
}
