use datapipe_domain::{CycleId, Scope, ScenarioId};

/// 创建实体时的归属上下文
///
/// 实体的 owner_id 由它的范围决定：SCENARIO 归属场景，CYCLE 归属周期
/// （没有周期时退化为场景），GLOBAL 没有归属。
#[derive(Debug, Clone, Default)]
pub struct Ownership {
    pub scenario_id: Option<ScenarioId>,
    pub cycle_id: Option<CycleId>,
}

impl Ownership {
    pub fn new(scenario_id: Option<ScenarioId>, cycle_id: Option<CycleId>) -> Self {
        Self { scenario_id, cycle_id }
    }

    pub fn owner_for(&self, scope: Scope) -> Option<String> {
        match scope {
            Scope::Global => None,
            Scope::Cycle => self
                .cycle_id
                .as_ref()
                .map(|id| id.to_string())
                .or_else(|| self.scenario_id.as_ref().map(|id| id.to_string())),
            Scope::Scenario => self.scenario_id.as_ref().map(|id| id.to_string()),
        }
    }
}
