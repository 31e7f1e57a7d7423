//! 实体ID
//!
//! 所有ID都是带前缀的字符串，例如 `DATANODE_sales_<uuid>`。

use std::fmt;

use datapipe_core::{DataPipeError, DataPipeResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// 根据配置ID生成新的唯一ID
            pub fn generate(config_id: &str) -> Self {
                Self(format!("{}_{}_{}", Self::PREFIX, config_id, Uuid::new_v4()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(DataNodeId, "DATANODE");
entity_id!(TaskId, "TASK");
entity_id!(JobId, "JOB");
entity_id!(PipelineId, "PIPELINE");
entity_id!(ScenarioId, "SCENARIO");
entity_id!(CycleId, "CYCLE");
entity_id!(
    /// 一次提交产生的所有 Job 共享同一个 SubmitId
    SubmitId,
    "SUBMISSION"
);

impl SubmitId {
    pub fn new_submission() -> Self {
        Self(format!("{}_{}", Self::PREFIX, Uuid::new_v4()))
    }
}

/// 配置ID必须是合法标识符：字母或下划线开头，后面只能是字母、数字、下划线
pub fn validate_config_id(config_id: &str) -> DataPipeResult<()> {
    let mut chars = config_id.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DataPipeError::InvalidConfigId(config_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = DataNodeId::generate("sales");
        let b = DataNodeId::generate("sales");
        assert!(a.as_str().starts_with("DATANODE_sales_"));
        assert_ne!(a, b);
        assert!(JobId::generate("task_a").as_str().starts_with("JOB_task_a_"));
        assert!(SubmitId::new_submission().as_str().starts_with("SUBMISSION_"));
    }

    #[test]
    fn test_validate_config_id() {
        assert!(validate_config_id("foo_bar").is_ok());
        assert!(validate_config_id("_private1").is_ok());
        assert!(validate_config_id("foo bar").is_err());
        assert!(validate_config_id("1abc").is_err());
        assert!(validate_config_id("").is_err());
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = TaskId::new("TASK_x_1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"TASK_x_1\"");
    }
}
