//! 领域模型：数据节点、任务、Job、管道、场景、周期以及实体蓝图

pub mod blueprints;
pub mod cycle;
pub mod data_node;
pub mod graph;
pub mod ids;
pub mod job;
pub mod pipeline;
pub mod scenario;
pub mod serde_helpers;
pub mod task;
pub mod value_objects;

pub use blueprints::{Blueprints, DataNodeConfig, PipelineConfig, ScenarioConfig, TaskConfig};
pub use cycle::Cycle;
pub use data_node::{
    filter_data, resolve_env, Condition, DataNode, DataStorage, Edit, EditOptions, InMemoryStore,
    JoinOperator, Operator, StorageType,
};
pub use graph::{order_tasks, TaskGraph};
pub use ids::*;
pub use job::{Job, JobStatus};
pub use pipeline::Pipeline;
pub use scenario::Scenario;
pub use task::Task;
pub use value_objects::{Frequency, Scope};
