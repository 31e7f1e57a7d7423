use std::collections::BTreeSet;

use datapipe_core::DataPipeResult;
use datapipe_domain::{CycleId, DataNode, Pipeline, PipelineId, Scenario, ScenarioId, Task, TaskId};

use super::Managers;

/// 直接或间接包含某个数据节点的实体
#[derive(Debug, Clone, Default)]
pub struct DataNodeParents {
    pub tasks: Vec<Task>,
    pub pipelines: Vec<Pipeline>,
    pub scenarios: Vec<Scenario>,
}

fn has_prefix(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('_'))
}

impl Managers {
    /// 数据节点的完整标签
    ///
    /// 显式的 `label` 属性直接返回，否则为 `<归属实体标签> > <简单标签>`，
    /// 没有归属时只有简单标签。
    pub async fn data_node_label(&self, dn: &DataNode) -> DataPipeResult<String> {
        if let Some(label) = dn.explicit_label()? {
            return Ok(label);
        }
        let simple = dn.simple_label()?;
        Ok(match self.owner_label(dn.owner_id.as_deref()).await? {
            Some(owner) => format!("{owner} > {simple}"),
            None => simple,
        })
    }

    async fn owner_label(&self, owner_id: Option<&str>) -> DataPipeResult<Option<String>> {
        let Some(owner_id) = owner_id else {
            return Ok(None);
        };
        if has_prefix(owner_id, ScenarioId::PREFIX) {
            let scenario = self.scenarios.get(&ScenarioId::new(owner_id)).await?;
            return Ok(Some(scenario.simple_label()));
        }
        if has_prefix(owner_id, CycleId::PREFIX) {
            let cycle = self.cycles.get(&CycleId::new(owner_id)).await?;
            return Ok(Some(cycle.name));
        }
        Ok(Some(owner_id.to_string()))
    }

    /// 沿 parent_ids 向上收集任务、管道和场景
    pub async fn data_node_parents(&self, dn: &DataNode) -> DataPipeResult<DataNodeParents> {
        let mut parents = DataNodeParents::default();
        let mut pipeline_ids = BTreeSet::new();
        let mut scenario_ids = BTreeSet::new();

        for task_id in &dn.parent_ids {
            let task = self.tasks.get(&TaskId::new(task_id.as_str())).await?;
            pipeline_ids.extend(task.parent_ids.iter().cloned());
            parents.tasks.push(task);
        }
        for pipeline_id in pipeline_ids {
            let pipeline = self.pipelines.get(&PipelineId::new(pipeline_id)).await?;
            scenario_ids.extend(pipeline.parent_ids.iter().cloned());
            parents.pipelines.push(pipeline);
        }
        for scenario_id in scenario_ids {
            parents
                .scenarios
                .push(self.scenarios.get(&ScenarioId::new(scenario_id)).await?);
        }
        Ok(parents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_prefix() {
        assert!(has_prefix("SCENARIO_s_1", ScenarioId::PREFIX));
        assert!(!has_prefix("SCENARIOS_1", ScenarioId::PREFIX));
        assert!(!has_prefix("CYCLE_DAILY_1", ScenarioId::PREFIX));
    }
}
