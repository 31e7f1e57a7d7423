use std::collections::HashMap;

use chrono::{DateTime, Utc};
use datapipe_core::Entity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ids::CycleId;
use crate::value_objects::Frequency;

/// 一个时间周期，同频率同周期的场景共享 CYCLE 范围的数据节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub id: CycleId,
    pub frequency: Frequency,
    pub name: String,
    pub creation_date: DateTime<Utc>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub properties: HashMap<String, Value>,
}

impl Cycle {
    /// 创建包含 `date` 的周期
    pub fn for_date(frequency: Frequency, date: DateTime<Utc>) -> Self {
        let (start_date, end_date) = frequency.period_bounds(date);
        Self {
            id: CycleId::new(format!("{}_{}_{}", CycleId::PREFIX, frequency.as_str(), Uuid::new_v4())),
            frequency,
            name: format!("{} {}", frequency.as_str(), start_date.format("%Y-%m-%d")),
            creation_date: Utc::now(),
            start_date,
            end_date,
            properties: HashMap::new(),
        }
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

impl Entity for Cycle {
    const ENTITY_NAME: &'static str = "cycle";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cycle_for_date() {
        let date = Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap();
        let cycle = Cycle::for_date(Frequency::Monthly, date);
        assert!(cycle.id.as_str().starts_with("CYCLE_MONTHLY_"));
        assert_eq!(cycle.name, "MONTHLY 2024-02-01");
        assert!(cycle.contains(date));
        assert!(!cycle.contains(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
    }
}
